//! Higher-level command composition on top of the frame codec.

use super::checksum::ChecksumAlgorithm;
use super::frame::compose_frame;
use super::registry::ids;
use super::reply::PidParameterSet;
use crate::error::Result;

/// Field width of each SET_PID value on the wire.
pub const PID_FIELD_WIDTH: usize = 8;

/// Pulse-period Kp used when neither the caller nor the device supplies one.
pub const FALLBACK_PP_KP: f64 = 0.15;
/// Pulse-period Ki fallback.
pub const FALLBACK_PP_KI: f64 = 0.14;
/// Pulse-period Kd fallback.
pub const FALLBACK_PP_KD: f64 = 0.05;
/// Holdoff fallback (firmware units).
pub const FALLBACK_HOLDOFF: f64 = 400.0;
/// Sample interval fallback (firmware units).
pub const FALLBACK_SAMPLE_INTERVAL: f64 = 300.0;

/// Render a PID value in the fixed-width, variable-precision wire format.
///
/// Magnitudes below 0.001 render as `0.0000`, below 10 with four decimals, otherwise with
/// two. The result is right-aligned in `width` columns and never truncated.
pub fn format_pid_value(value: f64, width: usize) -> String {
    let text = if value.abs() < 0.001 {
        "0.0000".to_string()
    } else if value.abs() < 10.0 {
        format!("{:.4}", value)
    } else {
        format!("{:.2}", value)
    };
    format!("{:>width$}", text, width = width)
}

/// Requested SET_PID values.
///
/// The pulse-width gains are mandatory. Every other field left as `None` is filled from
/// the device's current values when available, else from the `FALLBACK_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SetPidRequest {
    pub pw_kp: f64,
    pub pw_ki: f64,
    pub pw_kd: f64,
    pub pp_kp: Option<f64>,
    pub pp_ki: Option<f64>,
    pub pp_kd: Option<f64>,
    pub holdoff: Option<f64>,
    pub sample_interval: Option<f64>,
}

impl SetPidRequest {
    /// Request that only sets the pulse-width gains.
    pub fn pulse_width(pw_kp: f64, pw_ki: f64, pw_kd: f64) -> Self {
        Self {
            pw_kp,
            pw_ki,
            pw_kd,
            ..Default::default()
        }
    }

    /// Resolve every field against the current device values or the fallbacks.
    pub fn resolve(&self, current: Option<&PidParameterSet>) -> PidParameterSet {
        let pick = |requested: Option<f64>, from_device: fn(&PidParameterSet) -> f64, fallback: f64| {
            requested
                .or_else(|| current.map(from_device))
                .unwrap_or(fallback)
        };

        PidParameterSet {
            pw_kp: self.pw_kp,
            pw_ki: self.pw_ki,
            pw_kd: self.pw_kd,
            pp_kp: pick(self.pp_kp, |c| c.pp_kp, FALLBACK_PP_KP),
            pp_ki: pick(self.pp_ki, |c| c.pp_ki, FALLBACK_PP_KI),
            pp_kd: pick(self.pp_kd, |c| c.pp_kd, FALLBACK_PP_KD),
            holdoff: pick(self.holdoff, |c| c.holdoff, FALLBACK_HOLDOFF),
            sample_interval: pick(
                self.sample_interval,
                |c| c.sample_interval,
                FALLBACK_SAMPLE_INTERVAL,
            ),
        }
    }
}

/// SET_PID payload: the eight values, each [`PID_FIELD_WIDTH`] wide, concatenated with no
/// separator.
pub fn set_pid_payload(values: &PidParameterSet) -> String {
    values
        .to_array()
        .iter()
        .map(|v| format_pid_value(*v, PID_FIELD_WIDTH))
        .collect()
}

/// Compose a complete SET_PID frame.
pub fn compose_set_pid_command(
    request: &SetPidRequest,
    current: Option<&PidParameterSet>,
    checksum: &dyn ChecksumAlgorithm,
) -> Result<Vec<u8>> {
    let values = request.resolve(current);
    compose_frame(ids::SET_PID, &set_pid_payload(&values), checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::checksum::AdditiveChecksum;
    use crate::protocol::frame::parse_reply;

    #[test]
    fn formats_values_with_variable_precision() {
        assert_eq!(format_pid_value(0.5, 8), "  0.5000");
        assert_eq!(format_pid_value(-0.25, 8), " -0.2500");
        assert_eq!(format_pid_value(9.5, 8), "  9.5000");
        assert_eq!(format_pid_value(12.3456, 8), "   12.35");
        assert_eq!(format_pid_value(400.0, 8), "  400.00");
        assert_eq!(format_pid_value(-150.0, 8), " -150.00");
    }

    #[test]
    fn tiny_values_render_as_zero() {
        assert_eq!(format_pid_value(0.0, 8), "  0.0000");
        assert_eq!(format_pid_value(0.0009, 8), "  0.0000");
        assert_eq!(format_pid_value(-0.0009, 8), "  0.0000");
        assert_eq!(format_pid_value(0.001, 8), "  0.0010");
    }

    #[test]
    fn wide_values_are_not_truncated() {
        assert_eq!(format_pid_value(123456.0, 8), "123456.00");
        assert_eq!(format_pid_value(1.5, 4), "1.5000");
    }

    #[test]
    fn uses_fallbacks_without_device_values() {
        let values = SetPidRequest::pulse_width(0.5, 0.2, 0.01).resolve(None);
        assert_eq!(
            values.to_array(),
            [0.5, 0.2, 0.01, 0.15, 0.14, 0.05, 400.0, 300.0]
        );
    }

    #[test]
    fn prefers_explicit_then_device_values() {
        let current = PidParameterSet::from_array([9.0, 9.0, 9.0, 0.3, 0.4, 0.06, 250.0, 100.0]);
        let request = SetPidRequest {
            pp_ki: Some(0.7),
            holdoff: Some(500.0),
            ..SetPidRequest::pulse_width(1.0, 2.0, 3.0)
        };
        let values = request.resolve(Some(&current));
        assert_eq!(
            values.to_array(),
            [1.0, 2.0, 3.0, 0.3, 0.7, 0.06, 500.0, 100.0]
        );
    }

    #[test]
    fn set_pid_frame_payload_and_checksum_agree() {
        let frame = compose_set_pid_command(
            &SetPidRequest::pulse_width(0.5, 0.25, 0.01),
            None,
            &AdditiveChecksum,
        )
        .unwrap();
        let text = String::from_utf8(frame).unwrap();
        let payload = "  0.5000  0.2500  0.0100  0.1500  0.1400  0.0500  400.00  300.00";

        assert!(text.starts_with("$B5"));
        assert!(text.ends_with("\r\n"));
        assert_eq!(&text[3..3 + payload.len()], payload);
        assert_eq!(text.len(), 3 + 8 * 8 + 2 + 2);

        let (cmd, accumulated) = parse_reply(&text).unwrap();
        assert_eq!(cmd, 0xB5);
        assert_eq!(accumulated, payload);
    }
}
