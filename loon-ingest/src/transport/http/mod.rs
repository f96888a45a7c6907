//! HTTP transport.

mod routes;
mod server;

pub use routes::{UploadRequest, routes};
pub use server::{ServerConfig, serve};
