//! Shared helpers

pub mod retry;

pub use retry::RetryPolicy;
