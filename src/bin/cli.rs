use anyhow::{anyhow, bail, Context, Result};
use guestcam::buffer::{AcquireFence, BufferProvider, CachedStreamBuffer, MemoryBufferProvider};
use guestcam::camera::{default_request, ProtocolStrategy, StreamConfig, VirtualCamera};
use guestcam::config::GuestCamConfig;
use guestcam::host::socket::serve_connection;
use guestcam::host::{HostAddress, HostCommand, HostConnector, SocketConnector};
use guestcam::testing::STATUS_INVALID;
use guestcam::transform::{blob_jpeg_size, BLOB_TRAILER_LEN};
use guestcam::types::{PixelFormat, RequestTemplate, Size};
use serde::Serialize;
use std::env;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    guestcam::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: guestcam-cli <print-config|serve|probe|capture> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "print-config" => cmd_print_config(&args),
        "serve" => cmd_serve(&args),
        "probe" => cmd_probe(&args),
        "capture" => cmd_capture(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn load_config(args: &[String]) -> Result<GuestCamConfig> {
    let path = flag_value(args, "--config");
    GuestCamConfig::load_layered(path.as_deref()).context("loading configuration")
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn cmd_print_config(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

fn parse_address(args: &[String], usage: &str) -> Result<HostAddress> {
    let raw = args.get(2).ok_or_else(|| anyhow!("Usage: {}", usage))?;
    raw.parse::<HostAddress>().map_err(|e| anyhow!(e))
}

/// Minimal host device: acknowledges the service selector and every well formed
/// command, refuses the rest with -EINVAL.
fn answer(message: &str) -> i32 {
    if message.starts_with("name=") {
        log::info!("session for {}", message);
        return 0;
    }
    match message.parse::<HostCommand>() {
        Ok(command) => {
            log::info!("{}", command);
            0
        }
        Err(e) => {
            log::warn!("{}", e);
            STATUS_INVALID
        }
    }
}

fn cmd_serve(args: &[String]) -> Result<()> {
    let address = parse_address(args, "guestcam-cli serve <unix:PATH|tcp:HOST:PORT>")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    println!("Serving host camera device on {}", address);
    match &address {
        HostAddress::Tcp(addr) => {
            let listener = std::net::TcpListener::bind(addr)?;
            listener.set_nonblocking(true)?;
            accept_loop(&running, || {
                let (stream, _) = listener.accept()?;
                stream.set_nonblocking(false)?;
                Ok(stream)
            })?;
        }
        #[cfg(unix)]
        HostAddress::Unix(path) => {
            let _ = std::fs::remove_file(path);
            let listener = std::os::unix::net::UnixListener::bind(path)?;
            listener.set_nonblocking(true)?;
            accept_loop(&running, || {
                let (stream, _) = listener.accept()?;
                stream.set_nonblocking(false)?;
                Ok(stream)
            })?;
            let _ = std::fs::remove_file(path);
        }
        #[cfg(not(unix))]
        HostAddress::Unix(_) => bail!("unix sockets are not available on this platform"),
    }

    println!("Stopped");
    Ok(())
}

fn accept_loop<S, F>(running: &AtomicBool, mut accept: F) -> Result<()>
where
    S: io::Read + io::Write + Send + 'static,
    F: FnMut() -> io::Result<S>,
{
    while running.load(Ordering::SeqCst) {
        match accept() {
            Ok(stream) => {
                thread::spawn(move || {
                    if let Err(e) = serve_connection(stream, answer) {
                        log::warn!("connection ended: {}", e);
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn cmd_probe(args: &[String]) -> Result<()> {
    let address = parse_address(
        args,
        "guestcam-cli probe <unix:PATH|tcp:HOST:PORT> [--config FILE]",
    )?;
    let config = load_config(args)?;

    let connector = SocketConnector::new(address.clone(), config.io_timeout());
    let service = format!("name={}", config.camera.name);
    connector.connect(&service)?;
    println!("Host at {} accepted {}", address, service);
    Ok(())
}

/// `id:WxH:FORMAT`, e.g. `0:640x480:yuv`
fn parse_stream(arg: &str) -> Result<StreamConfig> {
    let mut parts = arg.splitn(3, ':');
    let (Some(id), Some(dims), Some(format)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("stream must look like id:WxH:FORMAT, got {:?}", arg);
    };

    let id: i32 = id.parse().with_context(|| format!("bad stream id in {:?}", arg))?;
    let (w, h) = dims
        .split_once('x')
        .ok_or_else(|| anyhow!("bad dimensions in {:?}", arg))?;
    let size = Size::new(w.parse()?, h.parse()?);
    let format: PixelFormat = format.parse().map_err(|e: String| anyhow!(e))?;

    let config = StreamConfig::new(id, size, format);
    Ok(if format == PixelFormat::Blob {
        let capacity = (size.area() * 3 / 2).max(64 * 1024) + BLOB_TRAILER_LEN;
        config.with_buffer_size(u32::try_from(capacity)?)
    } else {
        config
    })
}

#[derive(Debug, Serialize)]
struct BufferReport {
    frame: u32,
    buffer_id: u64,
    stream_id: i32,
    success: bool,
    jpeg_bytes: Option<usize>,
}

fn cmd_capture(args: &[String]) -> Result<()> {
    // capture <address> <id:WxH:FMT>... [--frames N] [--batched] [--config FILE] [--json]
    let address = parse_address(
        args,
        concat!(
            "guestcam-cli capture <unix:PATH|tcp:HOST:PORT> <id:WxH:FMT>... ",
            "[--frames N] [--batched] [--json]"
        ),
    )?;
    let mut config = load_config(args)?;
    config.host.address = address.to_string();
    if args.contains(&"--batched".to_string()) {
        config.pipeline.strategy = ProtocolStrategy::Batched;
    }
    let frames: u32 = flag_value(args, "--frames")
        .map(|f| f.parse::<u32>())
        .transpose()?
        .unwrap_or(1);
    let json = args.contains(&"--json".to_string());

    let mut streams = Vec::new();
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" | "--config" => i += 1,
            "--batched" | "--json" => {}
            arg => streams.push(parse_stream(arg)?),
        }
        i += 1;
    }
    if streams.is_empty() {
        bail!("at least one stream is required");
    }

    let provider = Arc::new(MemoryBufferProvider::new());
    let connector = Arc::new(SocketConnector::new(address, config.io_timeout()));
    let mut camera = VirtualCamera::from_config(&config, connector, provider.clone());

    let template = if streams.iter().any(|s| s.format == PixelFormat::Blob) {
        RequestTemplate::StillCapture
    } else {
        RequestTemplate::Preview
    };
    let hal_streams = camera.configure(&default_request(template), &streams)?;

    let mut buffers = Vec::new();
    for (stream, hal) in streams.iter().zip(&hal_streams) {
        let surface = if hal.override_format == PixelFormat::Blob {
            provider.allocate_blob(stream.buffer_size as usize)?
        } else {
            provider.allocate(stream.size, hal.override_format, hal.producer_usage)?
        };
        buffers.push(CachedStreamBuffer::new(
            surface.0,
            stream.id,
            surface,
            AcquireFence::signaled(),
        ));
    }

    let mut reports = Vec::new();
    for frame in 0..frames {
        let request = (frame == 0).then(|| default_request(template));
        let result = camera.process_capture_request(request, buffers);
        let frame_duration = result.frame_duration_ns;
        let outcomes = result.complete(true);

        buffers = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let jpeg_bytes = provider
                .describe(outcome.surface())
                .filter(|(_, format)| *format == PixelFormat::Blob)
                .and_then(|_| provider.read_surface(outcome.surface()))
                .and_then(|blob| blob_jpeg_size(&blob, blob.len()));
            reports.push(BufferReport {
                frame,
                buffer_id: outcome.buffer_id(),
                stream_id: outcome.stream_id(),
                success: outcome.success(),
                jpeg_bytes,
            });
            if !json {
                println!(
                    "frame {} stream {} buffer {}: {} ({} ns)",
                    frame,
                    outcome.stream_id(),
                    outcome.buffer_id(),
                    if outcome.success() { "ok" } else { "failed" },
                    frame_duration
                );
            }
            buffers.push(outcome.into_buffer());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    camera.close();
    for buffer in buffers {
        provider.free(buffer.surface());
    }
    Ok(())
}
