use clap::ValueEnum;
use std::path::PathBuf;
use vphone_boot::{BootConfig, FramebufferConfig};
use vphone_display::PixelFormat;

/// Canned guest boot commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// A plain login shell
    Shell,
    /// Install and start Phosh on an Xvfb framebuffer
    Phosh,
}

impl Preset {
    pub fn apply(self, config: &mut BootConfig) {
        match self {
            Preset::Shell => {
                config.boot_command = vec!["/bin/sh".to_string(), "-l".to_string()];
            }
            Preset::Phosh => {
                let mut fb = config.framebuffer.take().unwrap_or_default();
                // Xvfb -fbdir writes an XWD image of screen 0.
                fb.path = PathBuf::from("tmp/Xvfb_screen0");
                fb.format = PixelFormat::Xwd;

                config.boot_command = vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    phosh_script(&fb),
                ];
                config.framebuffer = Some(fb);
            }
        }
    }
}

fn phosh_script(fb: &FramebufferConfig) -> String {
    format!(
        "apk update && apk add phosh xvfb xdotool; \
         Xvfb :1 -screen 0 {}x{}x32 -fbdir /tmp & \
         export DISPLAY=:1; phosh",
        fb.width, fb.height
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phosh_preset() {
        let mut config = BootConfig::default();
        Preset::Phosh.apply(&mut config);

        assert_eq!(config.boot_command[..2], ["/bin/sh", "-c"]);
        assert_eq!(
            config.boot_command[2],
            "apk update && apk add phosh xvfb xdotool; Xvfb :1 -screen 0 1080x1920x32 -fbdir /tmp & export DISPLAY=:1; phosh"
        );

        let fb = config.framebuffer.unwrap();
        assert_eq!(fb.format, PixelFormat::Xwd);
        assert_eq!(fb.path, PathBuf::from("tmp/Xvfb_screen0"));
    }

    #[test]
    fn test_phosh_keeps_configured_resolution() {
        let mut config = BootConfig {
            framebuffer: Some(FramebufferConfig {
                width: 720,
                height: 1280,
                ..Default::default()
            }),
            ..Default::default()
        };
        Preset::Phosh.apply(&mut config);
        assert!(config.boot_command[2].contains("-screen 0 720x1280x32"));
    }
}
