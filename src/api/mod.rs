//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (for federation and publishing)
//! - Metrics (Prometheus)

mod activitypub;
pub mod metrics;

pub use activitypub::{ActivityJson, activitypub_router};
pub use metrics::metrics_router;
