use crate::error::BootError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vphone_display::PixelFormat;
use vphone_provision::{ArtifactSource, NetworkSettings};
use vphone_shim::BindMount;

pub const DEFAULT_RUNTIME_ASSET: &str = "bin/proot";
pub const DEFAULT_ROOTFS_ASSET: &str = "rootfs.tar.gz";
pub const DEFAULT_GUEST_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Where one artifact may come from, in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub sources: Vec<ArtifactSource>,
    pub expected_size: Option<u64>,
    pub sha256: Option<String>,
}

impl ArtifactConfig {
    pub fn bundled(name: impl Into<String>) -> Self {
        Self {
            sources: vec![ArtifactSource::Bundled(name.into())],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramebufferConfig {
    /// Relative paths are resolved against the rootfs directory.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub header_bytes: usize,
    pub interval_ms: u64,
}

impl Default for FramebufferConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tmp/fb0"),
            width: 1080,
            height: 1920,
            format: PixelFormat::Bgrx8888,
            header_bytes: 0,
            interval_ms: 16,
        }
    }
}

/// On-disk boot configuration. Every field is optional in the JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub data_dir: PathBuf,
    pub asset_dir: PathBuf,
    pub runtime: ArtifactConfig,
    pub rootfs: ArtifactConfig,
    pub binds: Vec<BindMount>,
    pub fake_root: bool,
    pub env: BTreeMap<String, String>,
    pub boot_command: Vec<String>,
    pub guest_workdir: Option<String>,
    pub remove_archive_after_extract: bool,
    pub framebuffer: Option<FramebufferConfig>,
    pub network: NetworkSettings,
    pub teardown_grace_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        let env = [
            ("HOME", "/root"),
            ("PATH", DEFAULT_GUEST_PATH),
            ("TERM", "xterm"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            data_dir: PathBuf::from("vphone-data"),
            asset_dir: PathBuf::from("assets"),
            runtime: ArtifactConfig::bundled(DEFAULT_RUNTIME_ASSET),
            rootfs: ArtifactConfig::bundled(DEFAULT_ROOTFS_ASSET),
            binds: vec![
                BindMount::same("/dev"),
                BindMount::same("/proc"),
                BindMount::same("/sys"),
            ],
            fake_root: true,
            env,
            boot_command: vec!["/bin/sh".to_string()],
            guest_workdir: None,
            remove_archive_after_extract: true,
            framebuffer: None,
            network: NetworkSettings::default(),
            teardown_grace_ms: 3000,
        }
    }
}

impl BootConfig {
    pub async fn load(path: &Path) -> Result<Self, BootError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BootError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, BootError> {
        serde_json::from_str(content).map_err(|e| BootError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, BootError> {
        serde_json::to_string_pretty(self).map_err(|e| BootError::Config(e.to_string()))
    }
}
