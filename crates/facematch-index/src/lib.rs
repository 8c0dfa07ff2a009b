//! facematch-index — Vector index adapter for the face match engine.
//!
//! Talks to Milvus over its RESTful v2 API: bounded connect retry, idempotent
//! collection setup, insert followed by flush, and L2 nearest-neighbor search.

pub mod client;
pub mod config;
pub mod retry;
mod wire;

pub use client::MilvusIndex;
pub use config::{IndexType, MilvusConfig, METRIC_L2};
pub use retry::{retry, RetryPolicy};
