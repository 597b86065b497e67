use crate::presets::Preset;
use crate::utils::parse_env_pair;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use vphone_boot::{
    BootConfig, BootError, BootEvent, BootOrchestrator, EventSender, FramebufferConfig,
    GuestSession,
};
use vphone_display::{PixelFormat, PointerAction, PointerEvent, PointerSink, RawFileSurface};
use vphone_provision::ArtifactSource;
use vphone_shim::{BindMount, StreamKind};

#[derive(Args, Debug, Default)]
pub struct BootArgs {
    /// JSON boot configuration; flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Private storage for the runtime, archive and rootfs
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Bundled assets root
    #[arg(long)]
    asset_dir: Option<PathBuf>,

    /// Download the sandbox runtime from this URL if no bundled copy exists
    #[arg(long)]
    runtime_url: Option<String>,

    /// Download the rootfs archive from this URL if no bundled copy exists
    #[arg(long)]
    rootfs_url: Option<String>,

    /// Extra bind mount (HOST or HOST:GUEST)
    #[arg(long = "bind", value_name = "HOST[:GUEST]")]
    binds: Vec<BindMount>,

    /// Guest environment variable (KEY=VALUE)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Run without emulated root
    #[arg(long)]
    no_fake_root: bool,

    /// Guest framebuffer file, relative to the rootfs
    #[arg(long)]
    framebuffer: Option<PathBuf>,

    /// Framebuffer pixel format (rgba8888, bgra8888, bgrx8888, xwd)
    #[arg(long, value_parser = parse_pixel_format)]
    fb_format: Option<PixelFormat>,

    /// Write presented frames as raw RGBA to this file
    #[arg(long)]
    display_out: Option<PathBuf>,

    /// Canned boot command
    #[arg(long, value_enum)]
    preset: Option<Preset>,

    /// Guest command (after `--`)
    #[arg(last = true)]
    command: Vec<String>,
}

fn parse_pixel_format(s: &str) -> Result<PixelFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "rgba8888" | "rgba" => Ok(PixelFormat::Rgba8888),
        "bgra8888" | "bgra" => Ok(PixelFormat::Bgra8888),
        "bgrx8888" | "bgrx" => Ok(PixelFormat::Bgrx8888),
        "xwd" => Ok(PixelFormat::Xwd),
        other => Err(format!("unknown pixel format '{}'", other)),
    }
}

async fn resolve_config(args: &BootArgs) -> Result<BootConfig, BootError> {
    let mut config = match &args.config {
        Some(path) => BootConfig::load(path).await?,
        None => BootConfig::default(),
    };

    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &args.asset_dir {
        config.asset_dir = dir.clone();
    }
    if let Some(url) = &args.runtime_url {
        config.runtime.sources.push(ArtifactSource::Url(url.clone()));
    }
    if let Some(url) = &args.rootfs_url {
        config.rootfs.sources.push(ArtifactSource::Url(url.clone()));
    }

    config.binds.extend(args.binds.iter().cloned());
    config.env.extend(args.env.iter().cloned());
    if args.no_fake_root {
        config.fake_root = false;
    }

    if let Some(preset) = args.preset {
        preset.apply(&mut config);
    }

    if args.framebuffer.is_some() || args.fb_format.is_some() || args.display_out.is_some() {
        let fb = config.framebuffer.get_or_insert_with(FramebufferConfig::default);
        if let Some(path) = &args.framebuffer {
            fb.path = path.clone();
        }
        if let Some(format) = args.fb_format {
            fb.format = format;
        }
    }

    if !args.command.is_empty() {
        config.boot_command = args.command.clone();
    }

    Ok(config)
}

pub async fn print_config(args: BootArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args).await?;
    println!("{}", config.to_json()?);
    Ok(())
}

/// Parses `:pointer <action> <x> <y>`. Returns `None` for ordinary command lines.
fn parse_pointer(line: &str) -> Option<Result<PointerEvent, String>> {
    let rest = line.strip_prefix(":pointer")?;
    let parts: Vec<&str> = rest.split_whitespace().collect();

    let [action, x, y] = parts.as_slice() else {
        return Some(Err("usage: :pointer <press|move|release> <x> <y>".to_string()));
    };

    let event = (|| -> Result<PointerEvent, String> {
        let action: PointerAction = action.parse().map_err(|e| format!("{}", e))?;
        let x = x.parse().map_err(|_| format!("invalid x coordinate '{}'", x))?;
        let y = y.parse().map_err(|_| format!("invalid y coordinate '{}'", y))?;
        Ok(PointerEvent::new(x, y, action))
    })();
    Some(event)
}

fn print_events(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<BootEvent>,
    guest_exited: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                BootEvent::Console(line) => match line.stream {
                    StreamKind::Stdout => println!("{}", line.text),
                    StreamKind::Stderr => eprintln!("{}", line.text),
                },
                BootEvent::Status(message) => eprintln!("{}", message),
                BootEvent::State(state) => tracing::debug!(state = %state, "Boot state"),
                BootEvent::GuestExited => guest_exited.notify_one(),
            }
        }
    })
}

pub async fn boot(args: BootArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args).await?;
    tracing::info!(data_dir = ?config.data_dir, asset_dir = ?config.asset_dir, "Booting guest");

    let (events, rx) = EventSender::channel();
    let guest_exited = Arc::new(Notify::new());
    let printer = print_events(rx, guest_exited.clone());

    let orchestrator = Arc::new(BootOrchestrator::from_config(&config, events)?);
    let mut session = orchestrator
        .clone()
        .spawn()
        .await
        .map_err(|e| BootError::Join(e.to_string()))??;

    if let Some(path) = &args.display_out {
        session.start_display(RawFileSurface::new(path))?;
    }

    attach(&session, &guest_exited).await;

    let status = session.teardown().await?;
    tracing::info!(status = %status, "Guest session ended");

    drop(orchestrator);
    // The printer exits once every event sender is gone.
    let _ = printer.await;
    Ok(())
}

/// Forwards host stdin to the guest until EOF, Ctrl-C or guest exit.
async fn attach(session: &GuestSession, guest_exited: &Notify) {
    let pointer = session.pointer_sink();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Failed to read stdin: {}", e);
                        break;
                    }
                };

                if line.trim() == ":quit" {
                    break;
                }

                match parse_pointer(&line) {
                    Some(Ok(event)) => {
                        if let Err(e) = pointer.send_pointer(event).await {
                            eprintln!("pointer error: {}", e);
                        }
                    }
                    Some(Err(usage)) => eprintln!("{}", usage),
                    // Failures are already reported as a status line.
                    None => {
                        let _ = session.send(&line).await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, shutting down guest...");
                break;
            }
            _ = guest_exited.notified() => break,
        }
    }
}
