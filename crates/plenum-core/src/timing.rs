//! Opt-in latency sampling for checker and migration phases.
//!
//! Enabled with `--timing` or `PLENUM_TIMING=1`. Samples are kept per thread
//! and drained into a [`TimingReport`] when a command finishes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;

/// Environment variable that turns sampling on.
pub const TIMING_ENV: &str = "PLENUM_TIMING";

/// Aggregated samples of every phase measured during one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingReport {
    pub phases: Vec<PhaseTiming>,
}

/// Samples of one named phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTiming {
    pub name: String,
    pub count: usize,
    pub total: Duration,
    pub median: Duration,
    pub max: Duration,
}

thread_local! {
    static SAMPLES: RefCell<BTreeMap<String, Vec<Duration>>> = const { RefCell::new(BTreeMap::new()) };
}

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Whether `PLENUM_TIMING` asks for sampling (`1`, `true`, `yes`, `on`).
#[must_use]
pub fn enabled_from_env() -> bool {
    std::env::var(TIMING_ENV).is_ok_and(|value| is_truthy(&value))
}

/// Turn sampling on or off; turning it off discards pending samples.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
    if !enabled {
        clear();
    }
}

#[must_use]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn clear() {
    SAMPLES.with(|samples| samples.borrow_mut().clear());
}

/// Run `f`, recording its duration under `phase` when sampling is on.
pub fn timed<R>(phase: &str, f: impl FnOnce() -> R) -> R {
    if !is_enabled() {
        return f();
    }
    let started = Instant::now();
    let result = f();
    record(phase, started.elapsed());
    result
}

/// Drain this thread's samples into a report ordered by phase name.
#[must_use]
pub fn take_report() -> TimingReport {
    let samples = SAMPLES.with(|samples| std::mem::take(&mut *samples.borrow_mut()));
    let phases = samples
        .into_iter()
        .map(|(name, mut durations)| {
            durations.sort_unstable();
            PhaseTiming {
                count: durations.len(),
                total: durations.iter().sum(),
                median: durations[durations.len() / 2],
                max: durations.last().copied().unwrap_or_default(),
                name,
            }
        })
        .collect();
    TimingReport { phases }
}

impl TimingReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let phases: Vec<_> = self
            .phases
            .iter()
            .map(|phase| {
                json!({
                    "phase": phase.name,
                    "count": phase.count,
                    "total_us": phase.total.as_micros(),
                    "median_us": phase.median.as_micros(),
                    "max_us": phase.max.as_micros(),
                })
            })
            .collect();
        json!({ "timing": phases })
    }

    /// Plain text table for stderr.
    #[must_use]
    pub fn render_table(&self) -> String {
        if self.phases.is_empty() {
            return "no timing samples recorded\n".to_string();
        }
        let width = self
            .phases
            .iter()
            .map(|phase| phase.name.len())
            .max()
            .unwrap_or(0)
            .max("phase".len());

        let mut out = format!(
            "{:<width$}  {:>5}  {:>10}  {:>10}  {:>10}\n",
            "phase", "count", "total", "median", "max"
        );
        for phase in &self.phases {
            let _ = writeln!(
                out,
                "{:<width$}  {:>5}  {:>10}  {:>10}  {:>10}",
                phase.name,
                phase.count,
                format_duration(phase.total),
                format_duration(phase.median),
                format_duration(phase.max),
            );
        }
        out
    }
}

fn record(phase: &str, elapsed: Duration) {
    SAMPLES.with(|samples| {
        samples
            .borrow_mut()
            .entry(phase.to_string())
            .or_default()
            .push(elapsed);
    });
}

fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros >= 1_000_000 {
        format!("{}.{:03}s", micros / 1_000_000, (micros % 1_000_000) / 1_000)
    } else if micros >= 1_000 {
        format!("{}.{:03}ms", micros / 1_000, micros % 1_000)
    } else {
        format!("{micros}µs")
    }
}

fn is_truthy(value: &str) -> bool {
    ["1", "true", "yes", "on"]
        .iter()
        .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
}
