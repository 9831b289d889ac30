//! Trial collection: turns the live line stream into an ordered sample sequence.
//!
//! Each line read from the transport is tried as telemetry, mapped to engineering units
//! and appended. Lines that are not telemetry are checked for the `OK DONE` and `ERR`
//! sentinels. Anything else is ignored.
//!
//! A status of `ABORT` in any collected sample marks the trial as aborted. That check runs
//! once collection has ended, so every sample up to the end is kept.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mapper::{map_telemetry, MappedSample};
use crate::protocol::telemetry::parse_telemetry_line;
use crate::serial::SerialPortIO;
use crate::transport::LineTransport;

/// Completion sentinel prefix.
pub const DONE_SENTINEL: &str = "OK DONE";
/// Device error sentinel prefix.
pub const ERROR_SENTINEL: &str = "ERR";
/// Sample status that marks a safety abort.
pub const ABORT_STATUS: &str = "ABORT";

/// How a trial ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome {
    /// The controller sent `OK DONE`.
    Completed,
    /// At least one sample carried status `ABORT`.
    Aborted,
    /// The controller sent an `ERR...` line, kept verbatim.
    DeviceError(String),
    /// The duration budget ran out before any sentinel.
    TimeBudgetExhausted,
}

/// Collection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectOptions {
    /// Timeout for each individual line read.
    pub line_timeout: Duration,
    /// Seconds between samples, used to synthesize missing times.
    pub sample_interval: Option<f64>,
    /// Total time allowed for the trial.
    pub duration_budget: Option<Duration>,
    /// Stop at the first `OK DONE`.
    pub stop_on_done: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            line_timeout: Duration::from_secs(5),
            sample_interval: None,
            duration_budget: None,
            stop_on_done: true,
        }
    }
}

/// Samples of one trial plus how it ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    /// Samples in arrival order.
    pub samples: Vec<MappedSample>,
    /// How collection ended.
    pub outcome: TrialOutcome,
}

impl Trial {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample times in seconds. Every collected sample has one.
    pub fn times(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| s.time_s.unwrap_or_default())
            .collect()
    }

    pub fn process_values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.process_value).collect()
    }

    pub fn control_outputs(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.control_output).collect()
    }

    pub fn statuses(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.status.as_str()).collect()
    }

    /// Safety abort flag. Callers must check this even for a successful collection.
    pub fn aborted(&self) -> bool {
        self.outcome == TrialOutcome::Aborted
    }
}

/// Collect one trial from `transport`.
///
/// `on_done` runs once for every `OK DONE` seen. Without a duration budget a read timeout
/// is fatal unless completion was already seen. Device errors end collection with
/// [`TrialOutcome::DeviceError`] rather than an `Err`, keeping the samples gathered so far.
pub async fn collect_trial<P, F>(
    transport: &mut LineTransport<P>,
    options: &CollectOptions,
    mut on_done: F,
) -> Result<Trial>
where
    P: SerialPortIO,
    F: FnMut(),
{
    let started = Instant::now();
    let mut samples: Vec<MappedSample> = Vec::new();
    let mut completed = false;
    let mut device_error: Option<String> = None;

    loop {
        let mut read_timeout = options.line_timeout;
        if let Some(budget) = options.duration_budget {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                break;
            }
            read_timeout = read_timeout.min(budget - elapsed);
        }

        let line = match transport.read_line(read_timeout).await {
            Ok(line) => line,
            Err(e) if e.is_timeout() && options.duration_budget.is_some() => continue,
            Err(e) if e.is_timeout() && completed => break,
            Err(e) => return Err(e),
        };

        if let Some(record) = parse_telemetry_line(&line) {
            match map_telemetry(&record) {
                Ok(mut sample) => {
                    if sample.time_s.is_none() {
                        let index = samples.len() as f64;
                        sample.time_s = Some(match options.sample_interval {
                            Some(interval) => index * interval,
                            None => index,
                        });
                    }
                    samples.push(sample);
                }
                Err(e) => warn!(error = %e, line = %line, "skipping unmappable telemetry"),
            }
            continue;
        }

        let text = line.trim_start();
        if text.starts_with(DONE_SENTINEL) {
            debug!(samples = samples.len(), "completion sentinel received");
            completed = true;
            on_done();
            if options.stop_on_done {
                break;
            }
        } else if text.starts_with(ERROR_SENTINEL) {
            warn!(line = %text, "device reported an error");
            device_error = Some(text.to_string());
            break;
        }
    }

    let aborted = samples.iter().any(|s| s.status == ABORT_STATUS);
    let outcome = match device_error {
        Some(line) => TrialOutcome::DeviceError(line),
        None if aborted => TrialOutcome::Aborted,
        None if completed => TrialOutcome::Completed,
        None => TrialOutcome::TimeBudgetExhausted,
    };

    info!(
        samples = samples.len(),
        outcome = ?outcome,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "trial collection finished"
    );
    Ok(Trial { samples, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn trial_accessors_split_columns() {
        let sample = |t: f64, y: f64, status: &str| MappedSample {
            time_s: Some(t),
            process_value: y,
            control_output: y / 2.0,
            status: status.to_string(),
            power: None,
        };
        let trial = Trial {
            samples: vec![sample(0.0, 1.0, "OK"), sample(0.5, 2.0, "RUNNING")],
            outcome: TrialOutcome::Completed,
        };
        assert_eq!(trial.len(), 2);
        assert_eq!(trial.times(), vec![0.0, 0.5]);
        assert_eq!(trial.process_values(), vec![1.0, 2.0]);
        assert_eq!(trial.control_outputs(), vec![0.5, 1.0]);
        assert_eq!(trial.statuses(), vec!["OK", "RUNNING"]);
        assert!(!trial.aborted());
    }

    #[tokio::test]
    async fn completion_callback_runs_and_stops_collection() {
        let (mut host, device) = tokio::io::duplex(1024);
        let mut link = LineTransport::new(device);
        host.write_all(b"DATA t=0 y=1 u=0 status=OK\nOK DONE\nDATA t=1 y=1 u=0 status=OK\n")
            .await
            .unwrap();

        let mut calls = 0;
        let trial = collect_trial(&mut link, &CollectOptions::default(), || calls += 1)
            .await
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(trial.outcome, TrialOutcome::Completed);
        assert_eq!(trial.len(), 1);
    }
}
