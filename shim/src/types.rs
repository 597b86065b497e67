use crate::error::ShimError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// A host directory exposed inside the guest. `guest` defaults to the host path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BindMount {
    pub host: PathBuf,
    pub guest: Option<String>,
}

impl BindMount {
    pub fn same(path: impl Into<PathBuf>) -> Self {
        Self {
            host: path.into(),
            guest: None,
        }
    }

    pub fn new(host: impl Into<PathBuf>, guest: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            guest: Some(guest.into()),
        }
    }

    pub fn guest_path(&self) -> String {
        self.guest
            .clone()
            .unwrap_or_else(|| self.host.to_string_lossy().to_string())
    }

    /// The value following `-b`: `host` alone, or `host:guest` when they differ.
    pub fn to_arg(&self) -> String {
        let host = self.host.to_string_lossy();
        match &self.guest {
            Some(guest) if guest.as_str() != host => format!("{}:{}", host, guest),
            _ => host.to_string(),
        }
    }
}

/// Parses `host` or `host:guest`. The split is on the last `:`, so a host path
/// may contain colons as long as a guest path follows; guest paths cannot.
impl FromStr for BindMount {
    type Err = ShimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, guest) = match s.rsplit_once(':') {
            Some((host, guest)) => (host, Some(guest)),
            None => (s, None),
        };

        if host.is_empty() || guest.is_some_and(str::is_empty) {
            return Err(ShimError::InvalidBind(s.to_string()));
        }

        Ok(Self {
            host: PathBuf::from(host),
            guest: guest.map(String::from),
        })
    }
}

impl TryFrom<String> for BindMount {
    type Error = ShimError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BindMount> for String {
    fn from(bind: BindMount) -> Self {
        bind.to_arg()
    }
}

/// Everything the launcher needs to start the sandbox runtime.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub runtime: PathBuf,
    pub rootfs: PathBuf,
    pub fake_root: bool,
    pub binds: Vec<BindMount>,
    /// Injected into the child environment, never into guest shell text.
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub guest_workdir: Option<String>,
    /// Working directory of the runtime process on the host.
    pub host_workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of guest output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub stream: StreamKind,
    pub text: String,
}

impl ConsoleLine {
    pub fn new(stream: StreamKind, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_parse() {
        let bind: BindMount = "/dev".parse().unwrap();
        assert_eq!(bind, BindMount::same("/dev"));
        assert_eq!(bind.to_arg(), "/dev");
        assert_eq!(bind.guest_path(), "/dev");

        let bind: BindMount = "/sdcard:/root/host".parse().unwrap();
        assert_eq!(bind, BindMount::new("/sdcard", "/root/host"));
        assert_eq!(bind.to_arg(), "/sdcard:/root/host");

        assert!("".parse::<BindMount>().is_err());
        assert!("/sdcard:".parse::<BindMount>().is_err());
    }

    #[test]
    fn test_bind_host_path_with_colon() {
        let bind: BindMount = "/mnt/usb:1/photos:/root/photos".parse().unwrap();
        assert_eq!(bind, BindMount::new("/mnt/usb:1/photos", "/root/photos"));
        assert_eq!(bind.to_arg(), "/mnt/usb:1/photos:/root/photos");
    }

    #[test]
    fn test_bind_same_guest_collapses() {
        assert_eq!(BindMount::new("/proc", "/proc").to_arg(), "/proc");
    }
}
