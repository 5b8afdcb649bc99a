//! Shared error types and small helpers used across the gateway crates.

mod error;
mod ids;
mod time;

pub use error::{GatewayError, GatewayResult};
pub use ids::new_id;
pub use time::now_ms;
