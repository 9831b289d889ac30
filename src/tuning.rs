//! Gain search: drives repeated trials through a black-box [`Minimizer`].
//!
//! The engine does not care how candidate gains are chosen. [`Tuner::run`] asks the
//! minimizer for a point, runs one trial with it, scores the trial and reports the score
//! back. Every evaluated point lands in a [`TuningHistory`], which can be written to CSV.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{ProtocolError, Result};
use crate::scoring::{compute_metrics, score_controller, TrialMetrics};
use crate::serial::SerialPortIO;
use crate::trial::{PidGains, TrialRunner};
use crate::transport::LineTransport;

/// One named search dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

/// Box-bounded search space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchSpace {
    dimensions: Vec<Dimension>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimension. Bounds given in the wrong order are swapped.
    pub fn with_dimension(mut self, name: &str, low: f64, high: f64) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        self.dimensions.push(Dimension {
            name: name.to_string(),
            low,
            high,
        });
        self
    }

    /// `kp`, `ki`, `kd`, each from zero to its maximum.
    pub fn pid_gains(kp_max: f64, ki_max: f64, kd_max: f64) -> Self {
        Self::new()
            .with_dimension("kp", 0.0, kp_max)
            .with_dimension("ki", 0.0, ki_max)
            .with_dimension("kd", 0.0, kd_max)
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// True when `point` has the right dimensionality and lies inside every bound.
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(point)
                .all(|(d, v)| (d.low..=d.high).contains(v))
    }
}

/// Ask/tell interface of a black-box minimizer.
pub trait Minimizer {
    /// Next point to evaluate.
    fn ask(&mut self) -> Vec<f64>;

    /// Report the score of an evaluated point. Lower is better.
    fn tell(&mut self, point: Vec<f64>, score: f64);

    /// Best point seen so far with its score.
    fn best(&self) -> Option<(&[f64], f64)>;
}

/// Uniform random sampling over a [`SearchSpace`].
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
    best: Option<(Vec<f64>, f64)>,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
            best: None,
        }
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }
}

impl Minimizer for RandomSearch {
    fn ask(&mut self) -> Vec<f64> {
        let rng = &mut self.rng;
        self.space
            .dimensions
            .iter()
            .map(|d| {
                if d.high > d.low {
                    rng.gen_range(d.low..=d.high)
                } else {
                    d.low
                }
            })
            .collect()
    }

    fn tell(&mut self, point: Vec<f64>, score: f64) {
        let improved = match &self.best {
            Some((_, best)) => score < *best,
            None => !score.is_nan(),
        };
        if improved {
            self.best = Some((point, score));
        }
    }

    fn best(&self) -> Option<(&[f64], f64)> {
        self.best.as_ref().map(|(p, s)| (p.as_slice(), *s))
    }
}

/// One evaluated point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningRecord {
    pub timestamp: DateTime<Utc>,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub score: f64,
    pub mae: f64,
    pub rmse: f64,
    pub error_std: f64,
    pub aborted: bool,
}

impl TuningRecord {
    pub fn new(gains: PidGains, metrics: TrialMetrics, score: f64, aborted: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            score,
            mae: metrics.mae,
            rmse: metrics.rmse,
            error_std: metrics.error_std,
            aborted,
        }
    }

    pub fn gains(&self) -> PidGains {
        PidGains::new(self.kp, self.ki, self.kd)
    }
}

/// Evaluated points of a tuning run, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TuningHistory {
    records: Vec<TuningRecord>,
}

impl TuningHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TuningRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TuningRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lowest-scoring record.
    pub fn best(&self) -> Option<&TuningRecord> {
        self.records
            .iter()
            .filter(|r| !r.score.is_nan())
            .min_by(|a, b| a.score.total_cmp(&b.score))
    }

    /// Write every record as CSV with a header row.
    #[cfg(feature = "storage_csv")]
    pub fn write_csv(&self, path: impl AsRef<std::path::Path>) -> anyhow::Result<()> {
        use anyhow::Context;

        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create tuning history {}", path.display()))?;
        if self.records.is_empty() {
            writer.write_record([
                "timestamp",
                "kp",
                "ki",
                "kd",
                "score",
                "mae",
                "rmse",
                "error_std",
                "aborted",
            ])?;
        }
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Runs a fixed number of trials through a minimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuner {
    pub iterations: usize,
    /// Process value each trial is scored against.
    pub desired_output: f64,
}

impl Tuner {
    pub fn new(iterations: usize, desired_output: f64) -> Self {
        Self {
            iterations,
            desired_output,
        }
    }

    /// Evaluate `iterations` points, appending each one to `history`.
    ///
    /// A trial that times out or fails a checksum is scored as an insufficient-data trial
    /// and the search continues. Device errors and link failures end the run; the records
    /// gathered so far stay in `history`.
    #[instrument(skip_all, fields(iterations = self.iterations), err)]
    pub async fn run<P, M>(
        &self,
        transport: &mut LineTransport<P>,
        runner: &TrialRunner,
        minimizer: &mut M,
        history: &mut TuningHistory,
    ) -> Result<()>
    where
        P: SerialPortIO,
        M: Minimizer + ?Sized,
    {
        for iteration in 1..=self.iterations {
            let point = minimizer.ask();
            let gains = PidGains::from_point(&point).ok_or_else(|| {
                ProtocolError::format(format!(
                    "minimizer proposed {} values, expected [kp, ki, kd]",
                    point.len()
                ))
            })?;

            let (used, metrics, aborted) = match runner.run(transport, gains).await {
                Ok(report) => (
                    report.gains,
                    compute_metrics(&report.trial.process_values(), self.desired_output),
                    report.aborted,
                ),
                Err(e) if e.is_retryable() => {
                    warn!(iteration, error = %e, "trial failed, scoring as insufficient data");
                    (
                        gains.clamp(&runner.settings().limits),
                        compute_metrics(&[], self.desired_output),
                        false,
                    )
                }
                Err(e) => return Err(e),
            };

            let score = score_controller(metrics.mae, metrics.error_std, aborted);
            info!(
                iteration,
                kp = used.kp,
                ki = used.ki,
                kd = used.kd,
                score,
                aborted,
                "trial scored"
            );
            minimizer.tell(point, score);
            history.push(TuningRecord::new(used, metrics, score, aborted));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_search_is_seeded_and_bounded() {
        let space = SearchSpace::pid_gains(1.0, 1.0, 0.2);
        let mut a = RandomSearch::new(space.clone(), 7);
        let mut b = RandomSearch::new(space.clone(), 7);
        for _ in 0..20 {
            let point = a.ask();
            assert_eq!(point, b.ask());
            assert!(space.contains(&point));
        }
    }

    #[test]
    fn degenerate_dimension_returns_its_bound() {
        let space = SearchSpace::new().with_dimension("kd", 0.0, 0.0);
        let mut search = RandomSearch::new(space, 1);
        assert_eq!(search.ask(), vec![0.0]);
    }

    #[test]
    fn swapped_bounds_are_normalized() {
        let space = SearchSpace::new().with_dimension("kp", 2.0, 1.0);
        assert_eq!(space.dimensions()[0].low, 1.0);
        assert_eq!(space.dimensions()[0].high, 2.0);
    }

    #[test]
    fn minimizer_tracks_lowest_score() {
        let mut search = RandomSearch::new(SearchSpace::pid_gains(1.0, 1.0, 0.2), 3);
        assert!(search.best().is_none());
        search.tell(vec![0.1, 0.1, 0.1], 2.0);
        search.tell(vec![0.2, 0.2, 0.1], 0.5);
        search.tell(vec![0.3, 0.3, 0.1], 1.0);
        let (point, score) = search.best().unwrap();
        assert_eq!(point, &[0.2, 0.2, 0.1]);
        assert_eq!(score, 0.5);
    }

    #[test]
    fn history_best_ignores_nan_scores() {
        let metrics = compute_metrics(&[], 0.8);
        let mut history = TuningHistory::new();
        history.push(TuningRecord::new(PidGains::new(0.1, 0.0, 0.0), metrics, f64::NAN, false));
        history.push(TuningRecord::new(PidGains::new(0.2, 0.0, 0.0), metrics, 3.0, false));
        history.push(TuningRecord::new(PidGains::new(0.3, 0.0, 0.0), metrics, 1.0, true));
        assert_eq!(history.best().unwrap().kp, 0.3);
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn writes_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");

        let metrics = TrialMetrics {
            mae: 0.1,
            rmse: 0.2,
            error_std: 0.05,
        };
        let mut history = TuningHistory::new();
        history.push(TuningRecord::new(PidGains::new(0.5, 0.25, 0.1), metrics, 0.15, false));
        history.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,kp,ki,kd,score,mae,rmse,error_std,aborted"
        );
        let row: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(&row[1..], ["0.5", "0.25", "0.1", "0.15", "0.1", "0.2", "0.05", "false"]);
        assert!(lines.next().is_none());
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn empty_history_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        TuningHistory::new().write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), "timestamp,kp,ki,kd,score,mae,rmse,error_std,aborted");
    }
}
