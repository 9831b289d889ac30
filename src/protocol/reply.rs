//! Reply decoders: GET_PID replies and short acknowledgements.

use serde::{Deserialize, Serialize};

use super::checksum::{parse_hex_byte, sum_mod_256};
use super::frame::is_framed_command;
use crate::error::{ProtocolError, Result};

/// Number of fields in a PID parameter reply.
pub const PID_FIELD_COUNT: usize = 8;

/// Field names in wire order.
pub const PID_FIELD_NAMES: [&str; PID_FIELD_COUNT] = [
    "pw_kp",
    "pw_ki",
    "pw_kd",
    "pp_kp",
    "pp_ki",
    "pp_kd",
    "holdoff",
    "sample_interval",
];

const GET_PID_REPLY_PREFIX: &str = "$B6";

/// Ack code that means success.
pub const ACK_OK: &str = "00";

/// The eight controller parameters, in wire order.
///
/// `pw_*` are the pulse-width loop gains, `pp_*` the pulse-period loop gains. `holdoff` and
/// `sample_interval` are in firmware units (milliseconds on current firmware).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParameterSet {
    pub pw_kp: f64,
    pub pw_ki: f64,
    pub pw_kd: f64,
    pub pp_kp: f64,
    pub pp_ki: f64,
    pub pp_kd: f64,
    pub holdoff: f64,
    pub sample_interval: f64,
}

impl PidParameterSet {
    /// Build from values in wire order.
    pub fn from_array(values: [f64; PID_FIELD_COUNT]) -> Self {
        let [pw_kp, pw_ki, pw_kd, pp_kp, pp_ki, pp_kd, holdoff, sample_interval] = values;
        Self {
            pw_kp,
            pw_ki,
            pw_kd,
            pp_kp,
            pp_ki,
            pp_kd,
            holdoff,
            sample_interval,
        }
    }

    /// Values in wire order.
    pub fn to_array(&self) -> [f64; PID_FIELD_COUNT] {
        [
            self.pw_kp,
            self.pw_ki,
            self.pw_kd,
            self.pp_kp,
            self.pp_ki,
            self.pp_kd,
            self.holdoff,
            self.sample_interval,
        ]
    }

    /// Telemetry sample interval in seconds, if the controller reports one.
    ///
    /// Firmware reports milliseconds; values of 1 or below are taken as seconds already.
    pub fn sample_interval_seconds(&self) -> Option<f64> {
        let raw = self.sample_interval;
        if raw.is_nan() || raw <= 0.0 {
            return None;
        }
        Some(if raw > 1.0 { raw / 1000.0 } else { raw })
    }
}

/// Decode a GET_PID reply frame (`$B6<fields><CS>\r\n`).
///
/// The checksum covers the exact bytes between the command id and the checksum, spacing
/// included. Fields are whitespace separated.
pub fn parse_pid_reply(packet: &str) -> Result<PidParameterSet> {
    if !is_framed_command(packet) {
        return Err(ProtocolError::format(
            "expected frame starting with '$' and ending with CRLF",
        ));
    }
    if !packet.is_ascii() {
        return Err(ProtocolError::format("reply contains non-ASCII bytes"));
    }

    let pkt = &packet[..packet.len() - 2];
    if !pkt.starts_with(GET_PID_REPLY_PREFIX) {
        let head: String = pkt.chars().take(10).collect();
        return Err(ProtocolError::format(format!(
            "expected GET_PID reply ($B6...), got '{}'",
            head
        )));
    }
    if pkt.len() < 10 {
        return Err(ProtocolError::format("GET_PID reply too short"));
    }

    let checksum_text = &pkt[pkt.len() - 2..];
    let data = &pkt[3..pkt.len() - 2];
    let received = parse_hex_byte(checksum_text).ok_or_else(|| {
        ProtocolError::format(format!("invalid checksum format '{}'", checksum_text))
    })?;
    let calculated = sum_mod_256(data.as_bytes());
    if calculated != received {
        return Err(ProtocolError::Checksum {
            calculated,
            received,
        });
    }

    let fields: Vec<&str> = data.split_whitespace().collect();
    if fields.len() != PID_FIELD_COUNT {
        return Err(ProtocolError::FieldCount {
            expected: PID_FIELD_COUNT,
            found: fields.len(),
        });
    }

    let mut values = [0.0; PID_FIELD_COUNT];
    for ((slot, text), name) in values.iter_mut().zip(&fields).zip(PID_FIELD_NAMES) {
        *slot = text.parse::<f64>().map_err(|_| ProtocolError::FieldFormat {
            field: name,
            value: (*text).to_string(),
        })?;
    }

    Ok(PidParameterSet::from_array(values))
}

/// A decoded `*<code>` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// True when the code is `00`.
    pub success: bool,
    /// The two characters after `*`, or empty when the line is not an ack.
    pub code: String,
}

/// Decode an acknowledgement line such as `*00`.
///
/// Lines that do not start with `*`, or are shorter than 3 characters, decode as
/// unsuccessful with an empty code.
pub fn parse_ack(line: &str) -> Ack {
    let s = line.trim();
    let code = match s.strip_prefix('*') {
        Some(rest) if s.len() >= 3 => rest.chars().take(2).collect::<String>(),
        _ => {
            return Ack {
                success: false,
                code: String::new(),
            }
        }
    };
    Ack {
        success: code == ACK_OK,
        code,
    }
}
