//! Service layer
//!
//! Contains business logic separated from HTTP handlers.

mod publish;

pub use publish::{PublishService, Published};
