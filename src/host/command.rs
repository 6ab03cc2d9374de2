//! Host command grammar
//!
//! Commands are single ASCII lines:
//!
//! ```text
//! connect | start | stop | disconnect
//! configure streams=<id>:<w>x<h>@<HEXFMT>,...
//! capture bufs=<id>:<hostRef>,...
//! frame dim=<w>x<h> pix=<fourcc> offset=<u64> expcomp=<%g>
//! ```

use super::ChannelError;
use crate::types::Size;
use std::fmt;
use std::str::FromStr;

/// One entry of a `configure` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub id: i32,
    pub size: Size,
    /// Pixel format code the host should produce
    pub format: u32,
}

/// One entry of a `capture` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTarget {
    pub stream_id: i32,
    pub host_ref: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Connect,
    Start,
    Stop,
    Disconnect,
    Configure(Vec<StreamSpec>),
    Capture(Vec<CaptureTarget>),
    Frame {
        size: Size,
        fourcc: u32,
        offset: u64,
        exposure_comp: f32,
    },
}

impl HostCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Disconnect => "disconnect",
            Self::Configure(_) => "configure",
            Self::Capture(_) => "capture",
            Self::Frame { .. } => "frame",
        }
    }

    /// Commands that set up the host session. A rejection leaves the session in an
    /// unknown state, so the channel has to be reopened.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Connect | Self::Start | Self::Configure(_))
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect | Self::Start | Self::Stop | Self::Disconnect => f.write_str(self.name()),
            Self::Configure(streams) => {
                f.write_str("configure streams=")?;
                for (i, s) in streams.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}@{:X}", s.id, s.size, s.format)?;
                }
                Ok(())
            }
            Self::Capture(targets) => {
                f.write_str("capture bufs=")?;
                for (i, t) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", t.stream_id, t.host_ref)?;
                }
                Ok(())
            }
            Self::Frame {
                size,
                fourcc,
                offset,
                exposure_comp,
            } => write!(
                f,
                "frame dim={} pix={} offset={} expcomp={}",
                size,
                fourcc,
                offset,
                format_g(f64::from(*exposure_comp))
            ),
        }
    }
}

/// printf `%g`: six significant digits, trailing zeros dropped, exponent form
/// outside `[1e-4, 1e6)`.
pub fn format_g(value: f64) -> String {
    const PRECISION: i32 = 6;

    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let sci = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exponent < -4 || exponent >= PRECISION {
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else {
        let fixed = format!("{:.*}", (PRECISION - 1 - exponent) as usize, value);
        trim_fraction(&fixed).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn protocol_error(what: &str, input: &str) -> ChannelError {
    ChannelError::Protocol(format!("{}: {:?}", what, input))
}

fn parse_size(s: &str) -> Result<Size, ChannelError> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| protocol_error("bad dimensions", s))?;
    let width = w.parse().map_err(|_| protocol_error("bad width", s))?;
    let height = h.parse().map_err(|_| protocol_error("bad height", s))?;
    Ok(Size::new(width, height))
}

fn parse_list<T>(
    body: &str,
    entry: impl Fn(&str) -> Result<T, ChannelError>,
) -> Result<Vec<T>, ChannelError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(',').map(entry).collect()
}

fn parse_stream_spec(s: &str) -> Result<StreamSpec, ChannelError> {
    let (id, rest) = s
        .split_once(':')
        .ok_or_else(|| protocol_error("bad stream entry", s))?;
    let (dim, format) = rest
        .split_once('@')
        .ok_or_else(|| protocol_error("bad stream entry", s))?;

    Ok(StreamSpec {
        id: id.parse().map_err(|_| protocol_error("bad stream id", s))?,
        size: parse_size(dim)?,
        format: u32::from_str_radix(format, 16).map_err(|_| protocol_error("bad format", s))?,
    })
}

fn parse_capture_target(s: &str) -> Result<CaptureTarget, ChannelError> {
    let (id, host_ref) = s
        .split_once(':')
        .ok_or_else(|| protocol_error("bad buffer entry", s))?;

    Ok(CaptureTarget {
        stream_id: id.parse().map_err(|_| protocol_error("bad stream id", s))?,
        host_ref: host_ref
            .parse()
            .map_err(|_| protocol_error("bad host reference", s))?,
    })
}

fn parse_frame(args: &str) -> Result<HostCommand, ChannelError> {
    let mut size = None;
    let mut fourcc = None;
    let mut offset = None;
    let mut exposure_comp = None;

    for arg in args.split_whitespace() {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| protocol_error("bad frame argument", arg))?;
        match key {
            "dim" => size = Some(parse_size(value)?),
            "pix" => fourcc = Some(value.parse().map_err(|_| protocol_error("bad pix", arg))?),
            "offset" => {
                offset = Some(value.parse().map_err(|_| protocol_error("bad offset", arg))?)
            }
            "expcomp" => {
                exposure_comp = Some(value.parse().map_err(|_| protocol_error("bad expcomp", arg))?)
            }
            _ => return Err(protocol_error("unknown frame argument", arg)),
        }
    }

    Ok(HostCommand::Frame {
        size: size.ok_or_else(|| protocol_error("frame without dim", args))?,
        fourcc: fourcc.ok_or_else(|| protocol_error("frame without pix", args))?,
        offset: offset.ok_or_else(|| protocol_error("frame without offset", args))?,
        exposure_comp: exposure_comp.unwrap_or(1.0),
    })
}

impl FromStr for HostCommand {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches('\0').trim();
        let (verb, args) = s.split_once(' ').unwrap_or((s, ""));

        match verb {
            "connect" if args.is_empty() => Ok(Self::Connect),
            "start" if args.is_empty() => Ok(Self::Start),
            "stop" if args.is_empty() => Ok(Self::Stop),
            "disconnect" if args.is_empty() => Ok(Self::Disconnect),
            "configure" => {
                let body = args
                    .strip_prefix("streams=")
                    .ok_or_else(|| protocol_error("configure without streams=", s))?;
                Ok(Self::Configure(parse_list(body, parse_stream_spec)?))
            }
            "capture" => {
                let body = args
                    .strip_prefix("bufs=")
                    .ok_or_else(|| protocol_error("capture without bufs=", s))?;
                Ok(Self::Capture(parse_list(body, parse_capture_target)?))
            }
            "frame" => parse_frame(args),
            _ => Err(protocol_error("unknown command", s)),
        }
    }
}
