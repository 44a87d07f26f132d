pub mod cached_client;
pub mod client;

pub use cached_client::ResilientClient;
pub use client::ApiClient;
