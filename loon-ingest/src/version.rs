//! Version information reported by the health check.

/// Crate version from Cargo.toml
pub const LOON_INGEST_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub loon_ingest: &'static str,
    /// Build or deployment label, if the operator set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            loon_ingest: LOON_INGEST_VERSION,
            build: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build(mut self, build: String) -> Self {
        self.build = Some(build);
        self
    }
}
