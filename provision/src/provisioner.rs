use crate::assets::AssetStore;
use crate::client::HttpFetcher;
use crate::error::ProvisionError;
use crate::types::*;
use sha2::{Digest, Sha256};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Resolves logical artifacts to local files, copying bundled assets or downloading.
pub struct ArtifactProvisioner {
    assets: AssetStore,
    http: HttpFetcher,
}

impl ArtifactProvisioner {
    pub fn new(assets: AssetStore, network: &NetworkSettings) -> Result<Self, ProvisionError> {
        Ok(Self {
            assets,
            http: HttpFetcher::new(network)?,
        })
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Makes sure `spec` exists at its target path.
    ///
    /// An existing non-empty target is returned as is. Otherwise each source is
    /// tried in order; data is written to a `.part` sibling and renamed over the
    /// target only once complete, so a failed attempt never leaves a target behind.
    pub async fn ensure(&self, spec: &ArtifactSpec) -> Result<ProvisionedArtifact, ProvisionError> {
        if let Some(existing) = self.existing(spec).await? {
            tracing::info!(artifact = %spec.name, path = ?existing.path, "Artifact already provisioned");
            return Ok(existing);
        }

        if let Some(parent) = spec.target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ProvisionError::write(parent, e))?;
        }

        let partial = partial_path(&spec.target);
        let mut last_error = None;

        for source in &spec.sources {
            tracing::info!(artifact = %spec.name, source = %source, "Provisioning artifact");

            match self.fetch(source, &partial).await {
                Ok(Some(size)) => {
                    if let Err(e) = self.finish(spec, &partial, size).await {
                        let _ = fs::remove_file(&partial).await;
                        return Err(e);
                    }

                    let executable = spec.kind == ArtifactKind::Binary;
                    tracing::info!(artifact = %spec.name, bytes = size, "Artifact provisioned");

                    return Ok(ProvisionedArtifact {
                        path: spec.target.clone(),
                        ready: true,
                        executable,
                        size,
                        fetched_from: Some(source.clone()),
                    });
                }
                Ok(None) => {
                    let _ = fs::remove_file(&partial).await;
                    tracing::debug!(artifact = %spec.name, source = %source, "Source has no data");
                }
                Err(e) => {
                    let _ = fs::remove_file(&partial).await;
                    tracing::warn!(artifact = %spec.name, source = %source, "Source failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProvisionError::ProvisioningFailed(spec.name.clone())))
    }

    async fn existing(
        &self,
        spec: &ArtifactSpec,
    ) -> Result<Option<ProvisionedArtifact>, ProvisionError> {
        let metadata = match fs::metadata(&spec.target).await {
            Ok(m) if m.is_file() && m.len() > 0 => m,
            _ => return Ok(None),
        };

        if let Some(expected) = spec.expected_size
            && metadata.len() != expected
        {
            tracing::warn!(
                artifact = %spec.name,
                expected = expected,
                actual = metadata.len(),
                "Existing artifact has unexpected size, provisioning again"
            );
            return Ok(None);
        }

        let mut executable = metadata.permissions().mode() & 0o111 != 0;
        if spec.kind == ArtifactKind::Binary && !executable {
            set_executable(&spec.target).await?;
            executable = true;
        }

        Ok(Some(ProvisionedArtifact {
            path: spec.target.clone(),
            ready: true,
            executable,
            size: metadata.len(),
            fetched_from: None,
        }))
    }

    /// Writes one source into `partial`. `Ok(None)` means the source had nothing to offer.
    async fn fetch(
        &self,
        source: &ArtifactSource,
        partial: &Path,
    ) -> Result<Option<u64>, ProvisionError> {
        let size = match source {
            ArtifactSource::Bundled(name) => {
                let Some(mut asset) = self
                    .assets
                    .open(name)
                    .await
                    .map_err(|e| ProvisionError::write(partial, e))?
                else {
                    return Ok(None);
                };

                let mut out = fs::File::create(partial)
                    .await
                    .map_err(|e| ProvisionError::write(partial, e))?;
                let size = tokio::io::copy(&mut asset, &mut out)
                    .await
                    .map_err(|e| ProvisionError::write(partial, e))?;
                out.flush()
                    .await
                    .map_err(|e| ProvisionError::write(partial, e))?;
                size
            }
            ArtifactSource::Url(url) => {
                let mut out = fs::File::create(partial)
                    .await
                    .map_err(|e| ProvisionError::write(partial, e))?;
                self.http.download_to(url, &mut out, partial).await?
            }
        };

        if size == 0 {
            return Ok(None);
        }

        Ok(Some(size))
    }

    async fn finish(
        &self,
        spec: &ArtifactSpec,
        partial: &Path,
        size: u64,
    ) -> Result<(), ProvisionError> {
        if let Some(expected) = spec.expected_size
            && size != expected
        {
            return Err(ProvisionError::IntegrityMismatch {
                name: spec.name.clone(),
                expected: format!("{} bytes", expected),
                actual: format!("{} bytes", size),
            });
        }

        if let Some(expected) = &spec.sha256 {
            let actual = sha256_file(partial).await?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(ProvisionError::IntegrityMismatch {
                    name: spec.name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        if spec.kind == ArtifactKind::Binary {
            set_executable(partial).await?;
        }

        fs::rename(partial, &spec.target)
            .await
            .map_err(|e| ProvisionError::write(&spec.target, e))?;

        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

async fn set_executable(path: &Path) -> Result<(), ProvisionError> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| ProvisionError::write(path, e))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions)
        .await
        .map_err(|e| ProvisionError::write(path, e))
}

async fn sha256_file(path: &Path) -> Result<String, ProvisionError> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| ProvisionError::write(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| ProvisionError::write(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
