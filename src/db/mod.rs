pub mod aggregate;
pub mod models;
pub mod store;

pub use aggregate::Consistency;
pub use store::{AggregationStore, PruneOutcome, StoreSettings};
