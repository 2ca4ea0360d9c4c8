//! Periodic process CPU and system memory telemetry.
//!
//! Purely informational: the monitor never touches the token intake or the
//! aggregator, and a platform without `/proc` just logs that it is disabled.

use tokio::sync::watch;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// One telemetry reading. `None` when the value could not be read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

/// Computes used-memory percentage from the contents of `/proc/meminfo`.
pub fn memory_percent_from_meminfo(content: &str) -> Option<f64> {
    let mut total_kb = None;
    let mut available_kb = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total_kb = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => {
                available_kb = parts.next().and_then(|v| v.parse::<u64>().ok())
            }
            _ => {}
        }
    }

    let total = total_kb.filter(|t| *t > 0)? as f64;
    let available = available_kb? as f64;
    Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
}

#[cfg(target_os = "linux")]
mod platform {
    use procfs::process::Process;
    use std::time::Instant;

    /// Process CPU usage between consecutive samples.
    pub struct CpuSampler {
        last: Option<(u64, Instant)>,
        ticks_per_second: f64,
    }

    impl CpuSampler {
        pub fn new() -> Self {
            Self {
                last: cpu_ticks().map(|t| (t, Instant::now())),
                ticks_per_second: procfs::ticks_per_second() as f64,
            }
        }

        pub fn sample(&mut self) -> Option<f64> {
            let now = Instant::now();
            let ticks = cpu_ticks()?;
            let previous = self.last.replace((ticks, now));

            let (last_ticks, last_at) = previous?;
            let wall = now.duration_since(last_at).as_secs_f64();
            if wall <= 0.0 || self.ticks_per_second <= 0.0 {
                return None;
            }
            let cpu_secs = ticks.saturating_sub(last_ticks) as f64 / self.ticks_per_second;
            Some(cpu_secs / wall * 100.0)
        }
    }

    fn cpu_ticks() -> Option<u64> {
        match Process::myself().and_then(|me| me.stat()) {
            Ok(stat) => Some(stat.utime + stat.stime),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read /proc CPU stats");
                None
            }
        }
    }

    pub fn memory_percent() -> Option<f64> {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        super::memory_percent_from_meminfo(&content)
    }

    pub const SUPPORTED: bool = true;
}

#[cfg(not(target_os = "linux"))]
mod platform {
    pub struct CpuSampler;

    impl CpuSampler {
        pub fn new() -> Self {
            CpuSampler
        }

        pub fn sample(&mut self) -> Option<f64> {
            None
        }
    }

    pub fn memory_percent() -> Option<f64> {
        None
    }

    pub const SUPPORTED: bool = false;
}

/// Logs one resource line per `interval` until `stop` flips to `true`.
pub async fn run_resource_monitor(interval: Duration, mut stop: watch::Receiver<bool>) {
    if !platform::SUPPORTED {
        warn!("Resource monitoring not supported on this platform - telemetry disabled");
        return;
    }

    let mut sampler = platform::CpuSampler::new();
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sample = ResourceSample {
                    cpu_percent: sampler.sample(),
                    memory_percent: platform::memory_percent(),
                };
                info!(
                    cpu_percent = sample.cpu_percent.map(|v| format!("{:.1}", v)),
                    memory_percent = sample.memory_percent.map(|v| format!("{:.1}", v)),
                    "Resource usage"
                );
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Resource monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB\n\
                           MemFree:         2000000 kB\n\
                           MemAvailable:    4000000 kB\n\
                           Buffers:          100000 kB\n";

    #[test]
    fn memory_percent_uses_available() {
        let pct = memory_percent_from_meminfo(MEMINFO).unwrap();
        assert!((pct - 75.0).abs() < 1e-9, "{}", pct);
    }

    #[test]
    fn memory_percent_missing_fields() {
        assert_eq!(memory_percent_from_meminfo("MemTotal: 100 kB\n"), None);
        assert_eq!(memory_percent_from_meminfo("MemTotal: 0 kB\nMemAvailable: 0 kB\n"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_stops_on_signal() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_resource_monitor(Duration::from_secs(1), rx));

        time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn monitor_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_resource_monitor(Duration::from_secs(60), rx));
        drop(tx);
        handle.await.unwrap();
    }
}
