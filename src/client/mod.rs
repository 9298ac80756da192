//! Insert endpoint client boundary.
//!
//! The pipeline talks to the remote tabular data service exclusively through
//! the [`base::InsertClient`] trait. [`memory::MemoryInsertClient`] accepts
//! everything and records it, which is useful for testing and development;
//! [`http::HttpInsertClient`] speaks the streaming-insert JSON wire format over
//! HTTP.

pub mod base;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;

pub use base::{InsertClient, InsertRequest};
