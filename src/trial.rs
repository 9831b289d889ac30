//! One tuning trial against a live controller.
//!
//! A trial clamps the candidate gains, snapshots the controller's PID parameters, optionally
//! writes the new pulse-width gains, starts the run (RUN, open shutter, TRIGGER) and then
//! collects telemetry until the controller reports completion or the budget runs out.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::collector::{collect_trial, CollectOptions, Trial, TrialOutcome};
use crate::error::{ProtocolError, Result};
use crate::protocol::composer::SetPidRequest;
use crate::protocol::registry::ids;
use crate::protocol::reply::{parse_ack, PidParameterSet};
use crate::serial::SerialPortIO;
use crate::transport::LineTransport;

/// Pulse-width loop gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    /// Gains from an optimizer point `[kp, ki, kd]`.
    pub fn from_point(point: &[f64]) -> Option<Self> {
        match point {
            [kp, ki, kd] => Some(Self::new(*kp, *ki, *kd)),
            _ => None,
        }
    }

    /// Clamp each gain into `[0, max]`.
    pub fn clamp(&self, limits: &GainLimits) -> Self {
        let bound = |value: f64, max: f64| value.max(0.0).min(max);
        Self {
            kp: bound(self.kp, limits.kp_max),
            ki: bound(self.ki, limits.ki_max),
            kd: bound(self.kd, limits.kd_max),
        }
    }
}

/// Upper bounds for each gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainLimits {
    pub kp_max: f64,
    pub ki_max: f64,
    pub kd_max: f64,
}

impl Default for GainLimits {
    fn default() -> Self {
        Self {
            kp_max: 1.0,
            ki_max: 1.0,
            kd_max: 0.2,
        }
    }
}

/// Settings shared by every trial of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSettings {
    pub limits: GainLimits,
    /// Timeout for request/response exchanges.
    pub command_timeout: Duration,
    /// Timeout for each telemetry line.
    pub line_timeout: Duration,
    pub duration_budget: Option<Duration>,
    pub stop_on_done: bool,
    /// Write the candidate gains to the controller before starting.
    pub apply_gains: bool,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            limits: GainLimits::default(),
            command_timeout: Duration::from_secs(2),
            line_timeout: Duration::from_secs(5),
            duration_budget: None,
            stop_on_done: true,
            apply_gains: false,
        }
    }
}

/// Result of a trial that did not end in a device error.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialReport {
    /// Gains actually used, after clamping.
    pub gains: PidGains,
    /// Controller parameters read before the run, when the read succeeded.
    pub snapshot: Option<PidParameterSet>,
    pub trial: Trial,
    pub aborted: bool,
}

/// Runs trials with fixed [`TrialSettings`].
#[derive(Debug, Clone, Default)]
pub struct TrialRunner {
    settings: TrialSettings,
}

impl TrialRunner {
    pub fn new(settings: TrialSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrialSettings {
        &self.settings
    }

    /// Run one trial with `gains`.
    ///
    /// A device error line ends the trial with [`ProtocolError::Device`]. A safety abort is
    /// not an error; check [`TrialReport::aborted`].
    #[instrument(skip(self, transport), err)]
    pub async fn run<P: SerialPortIO>(
        &self,
        transport: &mut LineTransport<P>,
        gains: PidGains,
    ) -> Result<TrialReport> {
        let gains = gains.clamp(&self.settings.limits);

        let snapshot = match transport.get_pid_values(self.settings.command_timeout).await {
            Ok(values) => Some(values),
            Err(e) => {
                warn!(error = %e, "could not read PID parameters before trial");
                None
            }
        };
        let sample_interval = snapshot.and_then(|s| s.sample_interval_seconds());

        if self.settings.apply_gains {
            let request = SetPidRequest::pulse_width(gains.kp, gains.ki, gains.kd);
            let ack = transport
                .set_pid_values(&request, snapshot, self.settings.command_timeout)
                .await?;
            if !parse_ack(&ack).success {
                warn!(ack = %ack, "controller did not acknowledge SET_PID with *00");
            }
        }

        transport.write_command("", ids::RUN).await?;
        transport.write_command("1", ids::SHUTTER_CONTROL).await?;
        transport.write_command("", ids::TRIGGER).await?;

        let options = CollectOptions {
            line_timeout: self.settings.line_timeout,
            sample_interval,
            duration_budget: self.settings.duration_budget,
            stop_on_done: self.settings.stop_on_done,
        };
        let trial = collect_trial(transport, &options, || info!("trial finished")).await?;

        if let TrialOutcome::DeviceError(line) = &trial.outcome {
            return Err(ProtocolError::Device(line.clone()));
        }

        let aborted = trial.aborted();
        if aborted {
            warn!(samples = trial.len(), "trial aborted by controller safety check");
        }

        Ok(TrialReport {
            gains,
            snapshot,
            trial,
            aborted,
        })
    }
}
