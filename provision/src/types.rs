use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = concat!("vphone/", env!("CARGO_PKG_VERSION"));

/// Where an artifact can be sourced from, tried in the order listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Path relative to the bundled asset root.
    Bundled(String),
    Url(String),
}

impl std::fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactSource::Bundled(name) => write!(f, "asset:{}", name),
            ArtifactSource::Url(url) => write!(f, "{}", url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Binary,
    Archive,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Binary => write!(f, "binary"),
            ArtifactKind::Archive => write!(f, "archive"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    pub name: String,
    pub kind: ArtifactKind,
    pub target: PathBuf,
    pub sources: Vec<ArtifactSource>,
    /// When set, an existing target of a different size is provisioned again.
    pub expected_size: Option<u64>,
    /// Hex sha256 checked after a fresh copy or download.
    pub sha256: Option<String>,
}

impl ArtifactSpec {
    pub fn new(name: impl Into<String>, kind: ArtifactKind, target: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            sources: Vec::new(),
            expected_size: None,
            sha256: None,
        }
    }

    pub fn binary(name: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self::new(name, ArtifactKind::Binary, target)
    }

    pub fn archive(name: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self::new(name, ArtifactKind::Archive, target)
    }

    pub fn with_source(mut self, source: ArtifactSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_sha256(mut self, hash: impl Into<String>) -> Self {
        self.sha256 = Some(hash.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionedArtifact {
    pub path: PathBuf,
    pub ready: bool,
    pub executable: bool,
    pub size: u64,
    /// `None` when the artifact was already present locally.
    pub fetched_from: Option<ArtifactSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
    pub use_system_proxy: bool,
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            read_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            use_system_proxy: true,
        }
    }
}
