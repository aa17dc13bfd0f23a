//! Load-metrics ticker for the Tandem hub.
//!
//! A process-wide ticker computes a [`LoadMetrics`] snapshot every
//! interval and broadcasts it to every session with at least one
//! subscriber. The ticker task exists only while somebody subscribes:
//! the first subscription spawns it, and it winds itself down when the
//! subscriber map drains.
//!
//! `cpu`, `memory`, and `network` derive from process event counters;
//! the remaining gauges are synthetic in this deployment (the editor's
//! monitoring panel wants a full row either way).

mod collector;
mod ticker;

pub use collector::MetricsCollector;
pub use ticker::{MetricsConfig, MetricsHub};
