use crate::config::BootConfig;
use crate::environment::GuestEnvironment;
use crate::error::BootError;
use crate::events::{ConsoleForwarder, EventSender};
use crate::session::GuestSession;
use crate::state::{BootState, StateCell};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vphone_archive::rootfs;
use vphone_provision::{ArtifactProvisioner, AssetStore, ProvisionedArtifact};
use vphone_shim::{ConsoleBridge, SandboxLauncher};

/// Sequences provisioning, extraction and launch for one guest environment.
///
/// An orchestrator boots at most once. A failed boot leaves it in `Failed`;
/// retrying means building a new orchestrator.
pub struct BootOrchestrator {
    env: Arc<GuestEnvironment>,
    provisioner: ArtifactProvisioner,
    launcher: SandboxLauncher,
    state: StateCell,
    events: EventSender,
}

impl BootOrchestrator {
    pub fn new(env: Arc<GuestEnvironment>, provisioner: ArtifactProvisioner, events: EventSender) -> Self {
        Self {
            env,
            provisioner,
            launcher: SandboxLauncher::default(),
            state: StateCell::new(),
            events,
        }
    }

    pub fn from_config(config: &BootConfig, events: EventSender) -> Result<Self, BootError> {
        let env = GuestEnvironment::from_config(config)?;
        let provisioner = ArtifactProvisioner::new(AssetStore::new(&env.asset_dir), &env.network)?;
        Ok(Self::new(env, provisioner, events))
    }

    pub fn with_launcher(mut self, launcher: SandboxLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn environment(&self) -> &Arc<GuestEnvironment> {
        &self.env
    }

    pub fn state(&self) -> BootState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootState> {
        self.state.subscribe()
    }

    /// Runs [`boot`](Self::boot) on a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<GuestSession, BootError>> {
        tokio::spawn(async move { self.boot().await })
    }

    /// Boots the guest. Any step failure moves the state to `Failed` and is returned.
    pub async fn boot(&self) -> Result<GuestSession, BootError> {
        self.state.begin()?;
        self.events.state(BootState::ProvisioningRuntime);

        match self.run().await {
            Ok(session) => Ok(session),
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(state = %self.state.get(), "Boot failed: {}", reason);
                if self.state.transition(BootState::Failed(reason.clone())).is_ok() {
                    self.events.state(BootState::Failed(reason.clone()));
                }
                self.events.status(format!("CRITICAL ERROR: {}", reason));
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<GuestSession, BootError> {
        self.announce_assets().await;

        self.events.status("Installing sandbox runtime...");
        let runtime = self.provisioner.ensure(&self.env.runtime).await?;
        self.report("runtime", &runtime);

        self.enter(BootState::ProvisioningRootfs)?;
        if rootfs::is_extracted(&self.env.rootfs_dir) {
            self.events.status("Root filesystem already extracted");
        } else {
            let archive = self.provisioner.ensure(&self.env.archive).await?;
            self.report("rootfs archive", &archive);

            self.enter(BootState::Extracting)?;
            self.extract(archive).await?;
        }
        rootfs::ensure_essential_dirs(&self.env.rootfs_dir).await?;

        self.enter(BootState::Launching)?;
        self.events.status("Booting guest...");
        let mut process = self.launcher.launch(&self.env.launch_spec())?;

        self.enter(BootState::Running)?;
        let console = ConsoleBridge::attach(&mut process, ConsoleForwarder::new(self.events.clone()))?;
        self.events.status(match process.pid() {
            Some(pid) => format!("Guest running (pid {})", pid),
            None => "Guest running".to_string(),
        });

        Ok(GuestSession::new(
            self.env.clone(),
            process,
            console,
            self.state.clone(),
            self.events.clone(),
        ))
    }

    async fn extract(&self, archive: ProvisionedArtifact) -> Result<(), BootError> {
        self.events.status("Extracting Linux OS... This takes a moment.");
        let result =
            vphone_archive::extract_async(archive.path.clone(), self.env.rootfs_dir.clone()).await?;

        for warning in &result.warnings {
            self.events.status(format!("extraction warning: {}", warning));
        }
        self.events.status(format!("Extracted {}", result));

        if self.env.remove_archive_after_extract {
            match tokio::fs::remove_file(&archive.path).await {
                Ok(()) => tracing::debug!(path = ?archive.path, "Removed rootfs archive"),
                Err(e) => tracing::warn!(path = ?archive.path, "Failed to remove rootfs archive: {}", e),
            }
        }
        Ok(())
    }

    async fn announce_assets(&self) {
        let assets = self.provisioner.assets();
        for (label, dir) in [("assets", ""), ("assets/bin", "bin")] {
            let listing = match assets.list(dir).await {
                Ok(names) if names.is_empty() => "None".to_string(),
                Ok(names) => names.join(", "),
                Err(e) => format!("unreadable ({})", e),
            };
            self.events.status(format!("Found in {}: {}", label, listing));
        }
    }

    fn report(&self, label: &str, artifact: &ProvisionedArtifact) {
        match &artifact.fetched_from {
            Some(source) => self.events.status(format!(
                "Installed {} from {} ({} bytes)",
                label, source, artifact.size
            )),
            None => self.events.status(format!("Using existing {}", label)),
        }
    }

    fn enter(&self, next: BootState) -> Result<(), BootError> {
        self.state.transition(next.clone())?;
        self.events.state(next);
        Ok(())
    }
}
