//! Telemetry to engineering-unit mapping.
//!
//! Legacy direct records pass through. Power packets are reduced to the same shape:
//! `duty_cycle = pulse_width / pulse_period` (0 when the period is not positive),
//! `process_value = current_power * duty_cycle`, `control_output = pulse_width`.

use serde::Serialize;

use crate::error::{ProtocolError, Result};
use crate::protocol::telemetry::{PowerPacket, TelemetryRecord, DEFAULT_STATUS};

/// Raw power-packet values kept alongside a mapped sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerDetail {
    pub initial_power: f64,
    pub current_power: f64,
    pub pulse_period: f64,
    pub pulse_width: f64,
    pub duty_cycle: f64,
}

/// One telemetry sample in engineering units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedSample {
    /// Seconds. `None` until the collector synthesizes a time for records without one.
    pub time_s: Option<f64>,
    pub process_value: f64,
    pub control_output: f64,
    pub status: String,
    /// Present only for samples derived from a power packet.
    pub power: Option<PowerDetail>,
}

/// Duty cycle of a pulse train; zero for non-positive periods.
pub fn duty_cycle(pulse_width: f64, pulse_period: f64) -> f64 {
    if pulse_period > 0.0 {
        pulse_width / pulse_period
    } else {
        0.0
    }
}

/// Map a decoded record to engineering units.
///
/// Fails with a format error only when a mandatory number is not finite.
pub fn map_telemetry(record: &TelemetryRecord) -> Result<MappedSample> {
    match record {
        TelemetryRecord::Direct {
            time,
            process_value,
            control_output,
            status,
        } => {
            require_finite("t", *time)?;
            require_finite("y", *process_value)?;
            require_finite("u", *control_output)?;
            Ok(MappedSample {
                time_s: Some(*time),
                process_value: *process_value,
                control_output: *control_output,
                status: status.clone(),
                power: None,
            })
        }
        TelemetryRecord::Power(packet) => map_power(packet),
    }
}

fn map_power(packet: &PowerPacket) -> Result<MappedSample> {
    require_finite("initial_power", packet.initial_power)?;
    require_finite("current_power", packet.current_power)?;
    require_finite("pulse_period", packet.pulse_period)?;
    require_finite("pulse_width", packet.pulse_width)?;

    let duty = duty_cycle(packet.pulse_width, packet.pulse_period);
    Ok(MappedSample {
        time_s: packet.time.filter(|t| t.is_finite()),
        process_value: packet.current_power * duty,
        control_output: packet.pulse_width,
        status: packet
            .status
            .clone()
            .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        power: Some(PowerDetail {
            initial_power: packet.initial_power,
            current_power: packet.current_power,
            pulse_period: packet.pulse_period,
            pulse_width: packet.pulse_width,
            duty_cycle: duty,
        }),
    })
}

fn require_finite(field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ProtocolError::format(format!(
            "telemetry field '{}' is not a number ({})",
            field, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::telemetry::{parse_telemetry_line, PowerEncoding};

    fn power(period: f64, width: f64) -> TelemetryRecord {
        TelemetryRecord::Power(PowerPacket {
            initial_power: 1.0,
            current_power: 2.0,
            pulse_period: period,
            pulse_width: width,
            time: None,
            status: None,
            encoding: PowerEncoding::KeyValue,
        })
    }

    #[test]
    fn direct_records_pass_through() {
        let record = parse_telemetry_line("DATA t=1.0 y=0.5 u=0.3 status=OK").unwrap();
        let sample = map_telemetry(&record).unwrap();
        assert_eq!(sample.time_s, Some(1.0));
        assert_eq!(sample.process_value, 0.5);
        assert_eq!(sample.control_output, 0.3);
        assert_eq!(sample.status, "OK");
        assert!(sample.power.is_none());
    }

    #[test]
    fn power_packets_derive_process_value_from_duty_cycle() {
        let sample = map_telemetry(&power(10.0, 5.0)).unwrap();
        let detail = sample.power.unwrap();
        assert_eq!(detail.duty_cycle, 0.5);
        assert_eq!(sample.process_value, 1.0);
        assert_eq!(sample.control_output, 5.0);
        assert_eq!(sample.status, DEFAULT_STATUS);
        assert_eq!(sample.time_s, None);
    }

    #[test]
    fn zero_period_yields_zero_duty_cycle() {
        let sample = map_telemetry(&power(0.0, 5.0)).unwrap();
        assert_eq!(sample.power.unwrap().duty_cycle, 0.0);
        assert_eq!(sample.process_value, 0.0);

        let negative = map_telemetry(&power(-3.0, 5.0)).unwrap();
        assert_eq!(negative.process_value, 0.0);
    }

    #[test]
    fn non_finite_mandatory_field_is_format_error() {
        let err = map_telemetry(&power(10.0, f64::NAN)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
