//! Compiles match predicates into a router rule expression.

use std::collections::HashMap;

/// Builds a rule matching any of `hosts`, all of `headers` (exact values) and
/// the `path` prefix.
///
/// Clauses are emitted in the fixed order Host, Header, PathPrefix and joined
/// with `&&`. An empty input drops its clause. Header names are sorted so the
/// output does not depend on map iteration order.
pub fn build_rule(hosts: &[String], headers: &HashMap<String, String>, path: &str) -> String {
    let mut operands = Vec::with_capacity(3);

    if !hosts.is_empty() {
        let host_rules: Vec<String> = hosts.iter().map(|host| format!("Host(`{host}`)")).collect();
        operands.push(format!("({})", host_rules.join(" || ")));
    }

    if !headers.is_empty() {
        let mut keys: Vec<&String> = headers.keys().collect();
        keys.sort();

        let header_rules: Vec<String> = keys
            .into_iter()
            .map(|key| format!("Header(`{key}`,`{}`)", headers[key]))
            .collect();
        operands.push(format!("({})", header_rules.join(" && ")));
    }

    if !path.is_empty() {
        operands.push(format!("PathPrefix(`{path}`)"));
    }

    operands.join(" && ")
}
