//! Telemetry line decoder.
//!
//! Firmware revisions have emitted three telemetry encodings, and a live link may carry
//! any of them:
//!
//! 1. Debug frame: `$B0` + four 8-hex fields + 2-hex checksum over the field characters.
//!    Fields are unsigned 32-bit integers: initial power, current power, pulse period,
//!    pulse width.
//! 2. Legacy direct line: `DATA t=<s> y=<pv> [sp=<ignored>] u=<out> status=<WORD>`.
//! 3. Key/value power line: `initial_power=.. current_power=.. pulse_period=..
//!    pulse_width=.. [t=..] [status=..]`, with case-insensitive key aliases.
//!
//! [`parse_telemetry_line`] tries them in that order. A line that matches none of them is
//! not telemetry and yields `None`; it is never an error.

use once_cell::sync::Lazy;
use regex::Regex;

use super::checksum::{parse_hex_byte, sum_mod_256};

/// Status assumed when a power packet does not carry one.
pub const DEFAULT_STATUS: &str = "RUNNING";

static DEBUG_FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\$B0([0-9A-Fa-f]{8})([0-9A-Fa-f]{8})([0-9A-Fa-f]{8})([0-9A-Fa-f]{8})([0-9A-Fa-f]{2})$",
    )
    .unwrap_or_else(|e| unreachable!("debug frame pattern is valid: {e}"))
});

static DATA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"t=([0-9.eE+-]+)\s+",
        r"y=([0-9.eE+-]+)",
        r"(?:\s+sp=([0-9.eE+-]+))?\s+",
        r"u=([0-9.eE+-]+)\s+",
        r"status=([A-Z]+)",
    ))
    .unwrap_or_else(|e| unreachable!("DATA pattern is valid: {e}"))
});

const INITIAL_POWER_KEYS: &[&str] = &["initial_power", "initialpower", "init_power", "p0", "ip"];
const CURRENT_POWER_KEYS: &[&str] = &["current_power", "currentpower", "power", "p", "cp"];
const PULSE_PERIOD_KEYS: &[&str] = &["pulse_period", "pulseperiod", "period", "pp", "tp"];
const PULSE_WIDTH_KEYS: &[&str] = &["pulse_width", "pulsewidth", "width", "pw", "tw"];
const TIME_KEYS: &[&str] = &["t", "time", "time_s"];
const STATUS_KEYS: &[&str] = &["status", "state"];

/// Which wire encoding a power packet arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEncoding {
    /// `$B0` hex debug frame.
    DebugFrame,
    /// `key=value` text line.
    KeyValue,
}

/// Power/duty-cycle telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerPacket {
    pub initial_power: f64,
    pub current_power: f64,
    pub pulse_period: f64,
    pub pulse_width: f64,
    pub time: Option<f64>,
    pub status: Option<String>,
    pub encoding: PowerEncoding,
}

/// A decoded telemetry line.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    /// Legacy direct measurement.
    Direct {
        time: f64,
        process_value: f64,
        control_output: f64,
        status: String,
    },
    /// Power and pulse timing, from either power encoding.
    Power(PowerPacket),
}

impl TelemetryRecord {
    /// Explicit time carried by the record, if any.
    pub fn time(&self) -> Option<f64> {
        match self {
            TelemetryRecord::Direct { time, .. } => Some(*time),
            TelemetryRecord::Power(packet) => packet.time,
        }
    }
}

/// Decode one telemetry line, or `None` if it is not telemetry.
pub fn parse_telemetry_line(line: &str) -> Option<TelemetryRecord> {
    let s = line.trim();
    if s.is_empty() {
        return None;
    }
    parse_debug_frame(s)
        .map(TelemetryRecord::Power)
        .or_else(|| parse_direct(s))
        .or_else(|| parse_key_value(s).map(TelemetryRecord::Power))
}

fn parse_debug_frame(s: &str) -> Option<PowerPacket> {
    let caps = DEBUG_FRAME_RE.captures(s)?;
    let field_text = &s[3..35];
    let received = parse_hex_byte(caps.get(5)?.as_str())?;
    if sum_mod_256(field_text.as_bytes()) != received {
        tracing::debug!(line = s, "debug telemetry frame failed checksum");
        return None;
    }

    let field = |i: usize| -> Option<f64> {
        let text = caps.get(i)?.as_str();
        u32::from_str_radix(text, 16).ok().map(f64::from)
    };

    Some(PowerPacket {
        initial_power: field(1)?,
        current_power: field(2)?,
        pulse_period: field(3)?,
        pulse_width: field(4)?,
        time: None,
        status: None,
        encoding: PowerEncoding::DebugFrame,
    })
}

fn parse_direct(s: &str) -> Option<TelemetryRecord> {
    if !s.starts_with("DATA") {
        return None;
    }
    let caps = DATA_RE.captures(s)?;
    let number = |i: usize| -> Option<f64> { caps.get(i)?.as_str().parse().ok() };

    Some(TelemetryRecord::Direct {
        time: number(1)?,
        process_value: number(2)?,
        control_output: number(4)?,
        status: caps.get(5)?.as_str().to_string(),
    })
}

fn parse_key_value(s: &str) -> Option<PowerPacket> {
    let mut initial_power = None;
    let mut current_power = None;
    let mut pulse_period = None;
    let mut pulse_width = None;
    let mut time = None;
    let mut status = None;

    let tokens = s.split(|c: char| c.is_whitespace() || c == ',' || c == ';');
    for token in tokens.filter(|t| !t.is_empty()) {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if STATUS_KEYS.contains(&key.as_str()) {
            if !value.is_empty() {
                status = Some(value.to_string());
            }
            continue;
        }

        let slot = if INITIAL_POWER_KEYS.contains(&key.as_str()) {
            &mut initial_power
        } else if CURRENT_POWER_KEYS.contains(&key.as_str()) {
            &mut current_power
        } else if PULSE_PERIOD_KEYS.contains(&key.as_str()) {
            &mut pulse_period
        } else if PULSE_WIDTH_KEYS.contains(&key.as_str()) {
            &mut pulse_width
        } else if TIME_KEYS.contains(&key.as_str()) {
            &mut time
        } else {
            continue;
        };
        if let Ok(number) = value.parse::<f64>() {
            *slot = Some(number);
        }
    }

    Some(PowerPacket {
        initial_power: initial_power?,
        current_power: current_power?,
        pulse_period: pulse_period?,
        pulse_width: pulse_width?,
        time,
        status,
        encoding: PowerEncoding::KeyValue,
    })
}
