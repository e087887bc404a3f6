pub mod api;
pub mod collector;
pub mod config;

use network_stats::{AverageAggregator, EventLog};
use std::sync::Arc;

use collector::Collector;

/// Everything the HTTP handlers need, shared across connections.
#[derive(Clone)]
pub struct ServiceState {
    pub aggregator: AverageAggregator,
    pub events: EventLog,
    pub collector: Arc<Collector>,
}
