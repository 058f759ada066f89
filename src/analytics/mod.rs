//! Visitor analytics
//!
//! Visits are upserted into the visitor table keyed by client IP, and statistics
//! are recomputed from that table on every query.

pub mod aggregator;
pub mod ip_extractor;
pub mod recorder;

pub use aggregator::StatsAggregator;
pub use ip_extractor::{extract_client_ip, host_without_port, primary_language, VisitorContext};
pub use recorder::VisitRecorder;
