use crate::config::{ArtifactConfig, BootConfig};
use crate::error::BootError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use vphone_display::FramebufferLayout;
use vphone_provision::{ArtifactKind, ArtifactSpec, NetworkSettings};
use vphone_shim::{BindMount, LaunchSpec};

pub const RUNTIME_RELATIVE_PATH: &str = "bin/proot";
pub const ROOTFS_DIR_NAME: &str = "rootfs";
pub const ARCHIVE_FILE_NAME: &str = "rootfs.tar.gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferSettings {
    pub path: PathBuf,
    pub layout: FramebufferLayout,
    pub interval: Duration,
}

/// One bootstrap target with every path resolved. Immutable once built.
#[derive(Debug, Clone)]
pub struct GuestEnvironment {
    pub data_dir: PathBuf,
    pub asset_dir: PathBuf,
    pub runtime: ArtifactSpec,
    pub archive: ArtifactSpec,
    pub rootfs_dir: PathBuf,
    pub binds: Vec<BindMount>,
    pub fake_root: bool,
    pub env: BTreeMap<String, String>,
    pub boot_command: Vec<String>,
    pub guest_workdir: Option<String>,
    pub remove_archive_after_extract: bool,
    pub framebuffer: Option<FramebufferSettings>,
    pub network: NetworkSettings,
    pub teardown_grace: Duration,
}

impl GuestEnvironment {
    pub fn from_config(config: &BootConfig) -> Result<Arc<Self>, BootError> {
        if config.boot_command.is_empty() || config.boot_command[0].is_empty() {
            return Err(BootError::Config("boot command must not be empty".to_string()));
        }

        if let Some(key) = config.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(BootError::Config(format!("invalid environment variable name {:?}", key)));
        }

        // The runtime is spawned with the data dir as its cwd, so relative paths
        // handed to it would resolve against the wrong directory.
        let data_dir = absolute(&config.data_dir)?;
        let asset_dir = absolute(&config.asset_dir)?;
        let binds = config
            .binds
            .iter()
            .map(|bind| {
                Ok(BindMount {
                    host: absolute(&bind.host)?,
                    guest: bind.guest.clone(),
                })
            })
            .collect::<Result<Vec<_>, BootError>>()?;
        let rootfs_dir = data_dir.join(ROOTFS_DIR_NAME);

        let runtime = artifact_spec(
            "runtime",
            ArtifactKind::Binary,
            data_dir.join(RUNTIME_RELATIVE_PATH),
            &config.runtime,
        );
        let archive = artifact_spec(
            "rootfs",
            ArtifactKind::Archive,
            data_dir.join(ARCHIVE_FILE_NAME),
            &config.rootfs,
        );

        let framebuffer = config.framebuffer.as_ref().map(|fb| FramebufferSettings {
            path: resolve_in(&rootfs_dir, &fb.path),
            layout: FramebufferLayout::new(fb.width, fb.height, fb.format)
                .with_header_bytes(fb.header_bytes),
            interval: Duration::from_millis(fb.interval_ms.max(1)),
        });

        Ok(Arc::new(Self {
            data_dir,
            asset_dir,
            runtime,
            archive,
            rootfs_dir,
            binds,
            fake_root: config.fake_root,
            env: config.env.clone(),
            boot_command: config.boot_command.clone(),
            guest_workdir: config.guest_workdir.clone(),
            remove_archive_after_extract: config.remove_archive_after_extract,
            framebuffer,
            network: config.network.clone(),
            teardown_grace: Duration::from_millis(config.teardown_grace_ms),
        }))
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            runtime: self.runtime.target.clone(),
            rootfs: self.rootfs_dir.clone(),
            fake_root: self.fake_root,
            binds: self.binds.clone(),
            env: self.env.clone(),
            command: self.boot_command.clone(),
            guest_workdir: self.guest_workdir.clone(),
            host_workdir: Some(self.data_dir.clone()),
        }
    }
}

fn artifact_spec(name: &str, kind: ArtifactKind, target: PathBuf, config: &ArtifactConfig) -> ArtifactSpec {
    let mut spec = ArtifactSpec::new(name, kind, target);
    spec.sources = config.sources.clone();
    spec.expected_size = config.expected_size;
    spec.sha256 = config.sha256.clone();
    spec
}

fn absolute(path: &Path) -> Result<PathBuf, BootError> {
    std::path::absolute(path)
        .map_err(|e| BootError::Config(format!("cannot resolve {}: {}", path.display(), e)))
}

fn resolve_in(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
