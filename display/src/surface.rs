use crate::error::DisplayError;
use crate::frame::Frame;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The host-side display target.
pub trait DisplaySurface: Send + 'static {
    /// Shows a complete frame. `SurfaceUnavailable` means "not ready, skip this tick".
    fn present(&mut self, frame: &Frame) -> Result<(), DisplayError>;
}

/// Writes each presented frame as raw RGBA8888 to a file, replacing it atomically.
#[derive(Debug, Clone)]
pub struct RawFileSurface {
    path: PathBuf,
}

impl RawFileSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DisplaySurface for RawFileSurface {
    fn present(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
                return Err(DisplayError::SurfaceUnavailable(format!(
                    "{} does not exist",
                    parent.display()
                )));
            }
            _ => {}
        }

        let staging = self.staging_path();
        let mut file =
            std::fs::File::create(&staging).map_err(|e| DisplayError::io(&staging, e))?;
        file.write_all(&frame.pixels)
            .map_err(|e| DisplayError::io(&staging, e))?;
        std::fs::rename(&staging, &self.path).map_err(|e| DisplayError::io(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_present_replaces_file() {
        let dir = TempDir::new().unwrap();
        let mut surface = RawFileSurface::new(dir.path().join("screen.rgba"));

        let frame = Frame::from_argb_pixels(1, 1, &[0xff01_0203]).unwrap();
        surface.present(&frame).unwrap();
        assert_eq!(std::fs::read(surface.path()).unwrap(), vec![1, 2, 3, 0xff]);

        let frame = Frame::from_argb_pixels(1, 1, &[0x0004_0506]).unwrap();
        surface.present(&frame).unwrap();
        assert_eq!(std::fs::read(surface.path()).unwrap(), vec![4, 5, 6, 0]);
        assert!(!dir.path().join("screen.rgba.tmp").exists());
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut surface = RawFileSurface::new(dir.path().join("gone").join("screen.rgba"));
        let frame = Frame::from_argb_pixels(1, 1, &[0]).unwrap();

        assert!(matches!(
            surface.present(&frame),
            Err(DisplayError::SurfaceUnavailable(_))
        ));
    }
}
