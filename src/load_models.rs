use std::time::Duration;

/// Maps a point in the test timeline to a target requests-per-second value.
///
/// Implementations must be pure: the dispatcher calls `target_qps` once per tick
/// and may call it with `elapsed >= total` only by accident, in which case the
/// last phase's rate is expected.
pub trait RateShaper: Send + Sync {
    fn target_qps(&self, elapsed: Duration, total: Duration) -> u64;
}

impl<F> RateShaper for F
where
    F: Fn(Duration, Duration) -> u64 + Send + Sync,
{
    fn target_qps(&self, elapsed: Duration, total: Duration) -> u64 {
        self(elapsed, total)
    }
}

/// One stair of a [`LoadModel::Steps`] profile.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct Step {
    /// Upper bound of this step as a fraction of the test duration (exclusive).
    pub until_fraction: f64,
    pub qps: u64,
}

/// Represents the built-in load shaping models.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadModel {
    /// Three equal phases: 50% of `max_qps`, then 100%, then 75%.
    Phased { max_qps: u64 },

    /// Fixed QPS target for the whole test.
    Constant { qps: u64 },

    /// Linear ramp in thirds:
    /// - First 1/3: ramp from min_qps to max_qps
    /// - Middle 1/3: sustain at max_qps
    /// - Last 1/3: ramp down from max_qps to min_qps
    Ramp { min_qps: u64, max_qps: u64 },

    /// Explicit staircase. Steps are checked in order; the first whose
    /// `until_fraction` lies beyond the current position wins, and the last
    /// step covers anything past the end.
    Steps(Vec<Step>),
}

impl LoadModel {
    /// Peak rate this model can ask for. Only logged at startup.
    pub fn peak_qps(&self) -> u64 {
        match self {
            LoadModel::Phased { max_qps } => *max_qps,
            LoadModel::Constant { qps } => *qps,
            LoadModel::Ramp { min_qps, max_qps } => (*min_qps).max(*max_qps),
            LoadModel::Steps(steps) => steps.iter().map(|s| s.qps).max().unwrap_or(0),
        }
    }

    fn phased_qps(max_qps: u64, elapsed_secs: f64, total_secs: f64) -> u64 {
        let max = max_qps as f64;
        if elapsed_secs < total_secs / 3.0 {
            (max * 0.5) as u64
        } else if elapsed_secs < 2.0 * total_secs / 3.0 {
            max_qps
        } else {
            (max * 0.75) as u64
        }
    }

    fn ramp_qps(min_qps: u64, max_qps: u64, elapsed_secs: f64, total_secs: f64) -> u64 {
        if total_secs <= 0.0 {
            return max_qps;
        }

        let min = min_qps as f64;
        let max = max_qps as f64;
        let third = total_secs / 3.0;

        let qps = if elapsed_secs <= third {
            min + (max - min) * (elapsed_secs / third)
        } else if elapsed_secs <= 2.0 * third {
            max
        } else {
            let ramp_down_elapsed = (elapsed_secs - 2.0 * third).min(third);
            max - (max - min) * (ramp_down_elapsed / third)
        };

        qps.max(0.0) as u64
    }

    fn steps_qps(steps: &[Step], elapsed_secs: f64, total_secs: f64) -> u64 {
        let position = if total_secs > 0.0 {
            elapsed_secs / total_secs
        } else {
            1.0
        };

        steps
            .iter()
            .find(|step| position < step.until_fraction)
            .or_else(|| steps.last())
            .map(|step| step.qps)
            .unwrap_or(0)
    }
}

impl RateShaper for LoadModel {
    fn target_qps(&self, elapsed: Duration, total: Duration) -> u64 {
        let elapsed_secs = elapsed.as_secs_f64();
        let total_secs = total.as_secs_f64();

        match self {
            LoadModel::Phased { max_qps } => Self::phased_qps(*max_qps, elapsed_secs, total_secs),
            LoadModel::Constant { qps } => *qps,
            LoadModel::Ramp { min_qps, max_qps } => {
                Self::ramp_qps(*min_qps, *max_qps, elapsed_secs, total_secs)
            }
            LoadModel::Steps(steps) => Self::steps_qps(steps, elapsed_secs, total_secs),
        }
    }
}
