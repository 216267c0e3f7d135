pub mod metrics_defs;

pub use metrics;
