//! Core data model and shared helpers for the rpcdiag engine.

pub mod input;
pub mod model;
pub mod retry;

pub use input::{parse_account, parse_endpoints, Account, InputError};
pub use model::*;
pub use retry::RetryPolicy;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
