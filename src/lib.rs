pub mod config;
pub mod error;
pub mod gateway;
pub mod liveness;
pub mod metrics;
pub mod normalizer;
pub mod providers;
pub mod ratelimit;
pub mod server;
pub mod types;

pub use error::RelayError;
pub type Result<T> = std::result::Result<T, RelayError>;
