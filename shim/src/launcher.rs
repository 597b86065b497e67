use crate::error::ShimError;
use crate::process::SandboxProcessHandle;
use crate::types::LaunchSpec;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use tokio::process::Command;

/// proot's flag for emulated root identity.
pub const DEFAULT_FAKE_ROOT_FLAG: &str = "-0";

/// Starts the user-space sandbox runtime over an extracted rootfs.
///
/// The argument vector has the shape
/// `<runtime> [fake-root] -r <rootfs> (-b <bind>)* [-w <dir>] <command...>`.
#[derive(Debug, Clone)]
pub struct SandboxLauncher {
    fake_root_flag: String,
}

impl SandboxLauncher {
    pub fn new() -> Self {
        Self {
            fake_root_flag: DEFAULT_FAKE_ROOT_FLAG.to_string(),
        }
    }

    pub fn with_fake_root_flag(mut self, flag: impl Into<String>) -> Self {
        self.fake_root_flag = flag.into();
        self
    }

    /// Arguments passed to the runtime, excluding the runtime itself.
    pub fn build_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args = Vec::new();

        if spec.fake_root {
            args.push(self.fake_root_flag.clone());
        }

        args.push("-r".to_string());
        args.push(spec.rootfs.to_string_lossy().to_string());

        for bind in &spec.binds {
            args.push("-b".to_string());
            args.push(bind.to_arg());
        }

        if let Some(dir) = &spec.guest_workdir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }

        if spec.command.is_empty() {
            args.push("/bin/sh".to_string());
        } else {
            args.extend(spec.command.iter().cloned());
        }

        args
    }

    /// Spawns the runtime with piped stdio. Must be called within a tokio runtime.
    pub fn launch(&self, spec: &LaunchSpec) -> Result<SandboxProcessHandle, ShimError> {
        self.check(spec)?;

        let args = self.build_args(spec);
        tracing::info!(runtime = ?spec.runtime, "Launching sandbox with args: {:?}", args);

        let mut command = Command::new(&spec.runtime);
        command
            .args(&args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.host_workdir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| ShimError::spawn(&spec.runtime, e.to_string()))?;

        let handle = SandboxProcessHandle::from_child(child);
        tracing::info!(pid = ?handle.pid(), "Sandbox process started");
        Ok(handle)
    }

    fn check(&self, spec: &LaunchSpec) -> Result<(), ShimError> {
        let metadata = std::fs::metadata(&spec.runtime)
            .map_err(|e| ShimError::spawn(&spec.runtime, format!("binary missing: {}", e)))?;

        if !metadata.is_file() {
            return Err(ShimError::spawn(&spec.runtime, "not a regular file"));
        }

        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ShimError::spawn(&spec.runtime, "permission denied"));
        }

        if !spec.rootfs.is_dir() {
            return Err(ShimError::spawn(
                &spec.runtime,
                format!("rootfs {} is not a directory", spec.rootfs.display()),
            ));
        }

        if let Some(dir) = &spec.host_workdir
            && !dir.is_dir()
        {
            return Err(ShimError::spawn(
                &spec.runtime,
                format!("working directory {} is invalid", dir.display()),
            ));
        }

        Ok(())
    }
}

impl Default for SandboxLauncher {
    fn default() -> Self {
        Self::new()
    }
}
