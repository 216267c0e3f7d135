//! Merging of partial HTTP configurations.
//!
//! Partials are copied in order into fresh maps. When two partials define the
//! same key the later one wins. Builders namespace their keys with the
//! identity of the source object, so a collision never happens for
//! well-formed input and the merge does not check for one.

use crate::config::HttpConfiguration;

/// Merges `partials` in order into a new configuration. The result always has
/// all three maps, even when every partial is empty.
pub fn merge_http<I>(partials: I) -> HttpConfiguration
where
    I: IntoIterator<Item = HttpConfiguration>,
{
    let mut merged = HttpConfiguration::new();
    for partial in partials {
        merged.extend(partial);
    }
    merged
}
