//! Polled filters and the matching rules they share with subscriptions.

pub mod criteria;
pub mod history;
pub mod registry;

pub use criteria::{FilterSpec, LogCriteria};
pub use history::collect_logs;
pub use registry::{FilterInfo, FilterRegistry};
