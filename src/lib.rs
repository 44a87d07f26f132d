//! Client-side resilience for remote configuration APIs.
//!
//! A TTL response cache and a retry layer (exponential backoff with jitter,
//! connectivity tracking, deferred replay on reconnect), composed by
//! [`api::ResilientClient`].

pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod net;
pub mod retry;

pub use error::{ErrorKind, RequestError};
