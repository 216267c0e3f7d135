use super::resources::{IngressBackend, IngressBackendSplit};
use dynamic::{Service, WeightedRoundRobin, WrrService};
use std::collections::BTreeMap;

/// Weight given to the only split of a path, whatever its declared percent.
pub const SINGLE_SPLIT_WEIGHT: u32 = 100;

pub fn split_key(router_key: &str, index: usize) -> String {
    format!("{router_key}-split-{index}")
}

/// Builds the weighted service of one router and the per-split services it
/// references, resolving each backend with `resolve`.
///
/// With several splits the declared percents are used as they are, without
/// renormalisation. The first resolution error is returned and nothing else.
pub fn build_weighted_round_robin<E, F>(
    router_key: &str,
    splits: &[IngressBackendSplit],
    mut resolve: F,
) -> Result<(WeightedRoundRobin, BTreeMap<String, Service>), E>
where
    F: FnMut(&IngressBackend) -> Result<Service, E>,
{
    let mut wrr = WeightedRoundRobin::default();
    let mut services = BTreeMap::new();

    for (index, split) in splits.iter().enumerate() {
        let key = split_key(router_key, index);
        let service = resolve(&split.backend)?;

        let weight = if splits.len() == 1 {
            SINGLE_SPLIT_WEIGHT
        } else {
            split.percent.unwrap_or_default()
        };
        wrr.services.push(WrrService {
            name: key.clone(),
            weight: Some(weight),
            headers: (!split.append_headers.is_empty()).then(|| split.append_headers.clone()),
        });
        services.insert(key, service);
    }

    Ok((wrr, services))
}
