//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod revalidate;
pub mod signature;
pub mod store;
pub mod telemetry;
