//! In-process host device with scripted behaviour
//!
//! Records every command, answers with configurable statuses and, when given the
//! memory provider, renders synthetic frames into the surfaces named by `frame`
//! and `capture` commands the way a real host writes guest memory.

use super::synthetic_data::synthetic_frame;
use crate::buffer::MemoryBufferProvider;
use crate::host::{ChannelError, HostCommand, HostConnector, HostTransport};
use crate::types::PixelFormat;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Status returned for commands the host cannot parse (`-EINVAL`)
pub const STATUS_INVALID: i32 = -22;

#[derive(Debug, Default)]
struct Script {
    commands: Vec<String>,
    services: Vec<String>,
    rejected: Vec<String>,
    broken: Vec<String>,
    refuse_connections: bool,
    frames_rendered: u64,
}

/// Cloneable handle to a scripted host; clones share one script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHost {
    script: Arc<Mutex<Script>>,
    provider: Option<Arc<MemoryBufferProvider>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render frames into surfaces of `provider`.
    pub fn with_provider(mut self, provider: Arc<MemoryBufferProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer commands starting with `prefix` with status -1.
    pub fn reject(&self, prefix: &str) {
        self.script().rejected.push(prefix.to_string());
    }

    /// Fail the transport when a command starts with `prefix`.
    pub fn break_on(&self, prefix: &str) {
        self.script().broken.push(prefix.to_string());
    }

    pub fn clear_faults(&self) {
        let mut script = self.script();
        script.rejected.clear();
        script.broken.clear();
        script.refuse_connections = false;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.script().refuse_connections = refuse;
    }

    /// Commands received so far, without service selectors
    pub fn commands(&self) -> Vec<String> {
        self.script().commands.clone()
    }

    /// Number of received commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.script()
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Service selectors of all accepted connections
    pub fn services(&self) -> Vec<String> {
        self.script().services.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.script().services.len()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.script().frames_rendered
    }

    fn render(&self, reference: u64, format_hint: Option<PixelFormat>) -> bool {
        let Some(provider) = &self.provider else {
            return true;
        };
        let Some(surface) = provider.surface_for_reference(reference) else {
            return false;
        };
        let Some((size, format)) = provider.describe(surface) else {
            return false;
        };

        let frame_number = {
            let mut script = self.script();
            script.frames_rendered += 1;
            script.frames_rendered
        };

        match synthetic_frame(frame_number, size, format_hint.unwrap_or(format)) {
            Some(data) => provider.write_surface(surface, &data),
            None => false,
        }
    }

    fn handle(&self, text: &str) -> io::Result<i32> {
        {
            let mut script = self.script();
            script.commands.push(text.to_string());

            if script.broken.iter().any(|p| text.starts_with(p.as_str())) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted transport failure"));
            }
            if script.rejected.iter().any(|p| text.starts_with(p.as_str())) {
                return Ok(-1);
            }
        }

        let command = match text.parse::<HostCommand>() {
            Ok(command) => command,
            Err(e) => {
                log::warn!("scripted host: {}", e);
                return Ok(STATUS_INVALID);
            }
        };

        let rendered = match command {
            HostCommand::Frame { fourcc, offset, .. } => {
                let hint = [PixelFormat::Rgba8888, PixelFormat::Ycbcr420_888]
                    .into_iter()
                    .find(|f| f.v4l2_fourcc() == Some(fourcc));
                self.render(offset, hint)
            }
            HostCommand::Capture(targets) => targets
                .iter()
                .fold(true, |ok, t| self.render(t.host_ref, None) && ok),
            _ => true,
        };

        Ok(if rendered { 0 } else { STATUS_INVALID })
    }
}

struct ScriptedTransport {
    host: ScriptedHost,
}

impl HostTransport for ScriptedTransport {
    fn exchange(&mut self, command: &[u8]) -> io::Result<i32> {
        let text = String::from_utf8_lossy(command);
        self.host.handle(&text)
    }
}

impl HostConnector for ScriptedHost {
    fn connect(&self, service: &str) -> Result<Box<dyn HostTransport>, ChannelError> {
        let mut script = self.script();
        if script.refuse_connections {
            return Err(ChannelError::Connect {
                service: service.to_string(),
                reason: "scripted refusal".to_string(),
            });
        }
        script.services.push(service.to_string());
        drop(script);

        Ok(Box::new(ScriptedTransport { host: self.clone() }))
    }
}
