//! Metrics registry and report writer
//!
//! The registry hands out three kinds of handles: [`Timer`] (duration
//! samples), [`Counter`] (a running total), and [`Gauge`] (point-in-time
//! values). Handles are cheap to clone, internally synchronized, and safe to
//! share across actor threads. Every sample is recorded with a UTC timestamp
//! so the report preserves the shape of the run, not just its totals.
//!
//! [`Registry::report`] writes the collected samples to an output stream in
//! CSV or newline-delimited JSON, one sample per line.

use std::collections::BTreeMap;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// One recorded observation.
#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    value: i64,
}

type Series = Arc<Mutex<Vec<Sample>>>;

fn push(series: &Series, value: i64) {
    let mut samples = series.lock().unwrap_or_else(PoisonError::into_inner);
    samples.push(Sample {
        at: Utc::now(),
        value,
    });
}

/// Records duration samples, in nanoseconds.
#[derive(Clone, Default)]
pub struct Timer {
    series: Series,
}

impl Timer {
    /// Record one duration sample.
    pub fn record(&self, duration: Duration) {
        push(&self.series, duration.as_nanos().min(i64::MAX as u128) as i64);
    }

    /// Start a stopwatch that records into this timer.
    pub fn start(&self) -> Stopwatch {
        Stopwatch {
            timer: self.clone(),
            started: Instant::now(),
            reported: false,
        }
    }
}

/// A running stopwatch tied to a [`Timer`].
///
/// Records its elapsed time when [`Stopwatch::report`] is called, or on drop
/// if it never was, so a timed block that exits early via `?` still gets
/// measured.
pub struct Stopwatch {
    timer: Timer,
    started: Instant,
    reported: bool,
}

impl Stopwatch {
    /// Record the elapsed time now.
    pub fn report(mut self) {
        self.timer.record(self.started.elapsed());
        self.reported = true;
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        if !self.reported {
            self.timer.record(self.started.elapsed());
        }
    }
}

/// A running total. Each change records the new total.
#[derive(Clone, Default)]
pub struct Counter {
    state: Arc<Mutex<CounterState>>,
}

#[derive(Default)]
struct CounterState {
    total: i64,
    samples: Vec<Sample>,
}

impl Counter {
    /// Add `delta` (which may be negative) to the total.
    pub fn add(&self, delta: i64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total += delta;
        let total = state.total;
        state.samples.push(Sample {
            at: Utc::now(),
            value: total,
        });
    }

    /// Increment the total by one.
    pub fn incr(&self) {
        self.add(1);
    }

    /// Decrement the total by one.
    pub fn decr(&self) {
        self.add(-1);
    }

    /// The current total.
    pub fn total(&self) -> i64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total
    }
}

/// Records point-in-time values.
#[derive(Clone, Default)]
pub struct Gauge {
    series: Series,
}

impl Gauge {
    /// Record the gauged value.
    pub fn set(&self, value: i64) {
        push(&self.series, value);
    }
}

/// Metrics output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// One CSV row per sample: `kind,name,timestamp,value`.
    Csv,
    /// One JSON object per line.
    Json,
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text {
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            other => Err(Error::invalid_configuration(format!(
                "unknown metrics format '{other}' (expected 'csv' or 'json')"
            ))),
        }
    }
}

/// The workload's metric handles, keyed by name.
///
/// Cloning shares the underlying storage; the driver clones one registry
/// into every place that records or reports.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    timers: Mutex<BTreeMap<String, Timer>>,
    counters: Mutex<BTreeMap<String, Counter>>,
    gauges: Mutex<BTreeMap<String, Gauge>>,
}

#[derive(Serialize)]
struct ReportRow<'a> {
    kind: &'static str,
    name: &'a str,
    at: DateTime<Utc>,
    value: i64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the timer named `name`.
    pub fn timer(&self, name: &str) -> Timer {
        let mut timers = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        timers.entry(name.to_string()).or_default().clone()
    }

    /// Get or create the counter named `name`.
    pub fn counter(&self, name: &str) -> Counter {
        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        counters.entry(name.to_string()).or_default().clone()
    }

    /// Get or create the gauge named `name`.
    pub fn gauge(&self, name: &str) -> Gauge {
        let mut gauges = self
            .inner
            .gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        gauges.entry(name.to_string()).or_default().clone()
    }

    /// Write every recorded sample to `writer`, one line per sample, grouped
    /// by metric kind and name.
    pub fn report<W: Write>(&self, writer: W, format: ReportFormat) -> Result<()> {
        let rows = self.collect_rows();
        match format {
            ReportFormat::Csv => {
                let mut csv = csv::Writer::from_writer(writer);
                for (kind, name, sample) in rows {
                    csv.serialize(ReportRow {
                        kind,
                        name: &name,
                        at: sample.at,
                        value: sample.value,
                    })
                    .map_err(|e| Error::runtime(format!("writing metrics: {e}")))?;
                }
                csv.flush()?;
            }
            ReportFormat::Json => {
                let mut writer = writer;
                for (kind, name, sample) in rows {
                    let row = ReportRow {
                        kind,
                        name: &name,
                        at: sample.at,
                        value: sample.value,
                    };
                    serde_json::to_writer(&mut writer, &row)
                        .map_err(|e| Error::runtime(format!("writing metrics: {e}")))?;
                    writer.write_all(b"\n")?;
                }
                writer.flush()?;
            }
        }
        Ok(())
    }

    fn collect_rows(&self) -> Vec<(&'static str, String, Sample)> {
        let mut rows = Vec::new();
        {
            let timers = self
                .inner
                .timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, timer) in timers.iter() {
                let samples = timer
                    .series
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                rows.extend(samples.iter().map(|s| ("timer", name.clone(), *s)));
            }
        }
        {
            let counters = self
                .inner
                .counters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, counter) in counters.iter() {
                let state = counter
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                rows.extend(state.samples.iter().map(|s| ("counter", name.clone(), *s)));
            }
        }
        {
            let gauges = self
                .inner
                .gauges
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, gauge) in gauges.iter() {
                let samples = gauge
                    .series
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                rows.extend(samples.iter().map(|s| ("gauge", name.clone(), *s)));
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_records_samples() {
        let registry = Registry::new();
        let timer = registry.timer("t");
        timer.record(Duration::from_millis(5));
        timer.record(Duration::from_millis(10));

        let rows = registry.collect_rows();
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|(kind, name, _)| *kind == "timer" && name.as_str() == "t"));
        assert!(rows[0].2.value >= 5_000_000);
    }

    #[test]
    fn test_stopwatch_reports_on_drop() {
        let registry = Registry::new();
        let timer = registry.timer("t");
        {
            let _stopwatch = timer.start();
            std::thread::sleep(Duration::from_millis(5));
        }
        let rows = registry.collect_rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].2.value >= 5_000_000);
    }

    #[test]
    fn test_stopwatch_report_records_once() {
        let registry = Registry::new();
        let timer = registry.timer("t");
        let stopwatch = timer.start();
        stopwatch.report();
        assert_eq!(registry.collect_rows().len(), 1);
    }

    #[test]
    fn test_counter_tracks_running_total() {
        let counter = Counter::default();
        counter.incr();
        counter.incr();
        counter.add(3);
        counter.decr();
        assert_eq!(counter.total(), 4);
    }

    #[test]
    fn test_registry_returns_shared_handles() {
        let registry = Registry::new();
        let first = registry.counter("ops");
        let second = registry.counter("ops");
        first.incr();
        second.incr();
        assert_eq!(first.total(), 2);
    }

    #[test]
    fn test_report_format_parsing() {
        assert_eq!("csv".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("xml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_csv_report_has_one_line_per_sample() {
        let registry = Registry::new();
        registry.counter("ops").incr();
        registry.counter("ops").incr();
        registry.gauge("depth").set(42);

        let mut out = Vec::new();
        registry.report(&mut out, ReportFormat::Csv).unwrap();
        let text = String::from_utf8(out).unwrap();
        // Header plus three samples.
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("counter,ops"));
        assert!(text.contains("gauge,depth"));
    }

    #[test]
    fn test_json_report_lines_parse() {
        let registry = Registry::new();
        registry.timer("t").record(Duration::from_millis(1));
        registry.gauge("g").set(-3);

        let mut out = Vec::new();
        registry.report(&mut out, ReportFormat::Json).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["kind"], "timer");
        assert_eq!(rows[1]["value"], -3);
    }
}
