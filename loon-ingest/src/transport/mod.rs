//! Transport layer for loon-ingest.
//!
//! Currently provides HTTP transport via axum over [`crate::service::IngestService`].

pub mod http;

pub use http::{ServerConfig, serve};
