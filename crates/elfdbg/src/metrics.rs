//! Metrics collection and reporting using metrics-rs.
//!
//! Analysis and debugging record through the `metrics` facade; the CLI
//! installs [`CliRecorder`] to print a summary when `--metrics` is passed.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use parking_lot::RwLock;

/// How the debugger was asked to advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Into,
    Over,
    Out,
}

impl StepKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Into => "into",
            Self::Over => "over",
            Self::Out => "out",
        }
    }
}

// ============================================================================
// Metric descriptions
// ============================================================================

/// Initialize metric descriptions.
///
/// Call this once at startup, after installing a recorder.
pub fn init() {
    describe_counter!(
        "elfdbg_instructions_decoded_total",
        Unit::Count,
        "Instructions decoded from executable segments"
    );
    describe_counter!(
        "elfdbg_functions_found_total",
        Unit::Count,
        "Functions recovered by prologue analysis"
    );
    describe_counter!(
        "elfdbg_breakpoint_hits_total",
        Unit::Count,
        "Stops reported on user breakpoints"
    );
    describe_counter!(
        "elfdbg_steps_total",
        Unit::Count,
        "Completed step operations"
    );

    describe_gauge!(
        "elfdbg_analysis_time_seconds",
        Unit::Seconds,
        "Wall-clock time of the last analysis"
    );

    describe_histogram!(
        "elfdbg_analysis_duration_seconds",
        Unit::Seconds,
        "Analysis duration distribution"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

/// Record one finished analysis.
pub fn record_analysis(arch: &str, instructions: usize, functions: usize, secs: f64) {
    let labels = [("arch", arch.to_string())];

    counter!("elfdbg_instructions_decoded_total", &labels).increment(instructions as u64);
    counter!("elfdbg_functions_found_total", &labels).increment(functions as u64);
    gauge!("elfdbg_analysis_time_seconds", &labels).set(secs);
    histogram!("elfdbg_analysis_duration_seconds", &labels).record(secs);
}

pub fn record_step(kind: StepKind) {
    counter!("elfdbg_steps_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_breakpoint_hit() {
    counter!("elfdbg_breakpoint_hits_total").increment(1);
}

// ============================================================================
// CLI Recorder for terminal output
// ============================================================================

#[derive(Default)]
struct CounterStorage {
    values: RwLock<HashMap<String, u64>>,
}

#[derive(Default)]
struct GaugeStorage {
    values: RwLock<HashMap<String, f64>>,
}

#[derive(Default)]
struct HistogramStorage {
    values: RwLock<HashMap<String, Vec<f64>>>,
}

struct CliCounter {
    key: String,
    storage: Arc<CounterStorage>,
}

impl metrics::CounterFn for CliCounter {
    fn increment(&self, value: u64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        let mut values = self.storage.values.write();
        values.insert(self.key.clone(), value);
    }
}

struct CliGauge {
    key: String,
    storage: Arc<GaugeStorage>,
}

impl metrics::GaugeFn for CliGauge {
    fn increment(&self, value: f64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        let mut values = self.storage.values.write();
        values.insert(self.key.clone(), value);
    }
}

struct CliHistogram {
    key: String,
    storage: Arc<HistogramStorage>,
}

impl metrics::HistogramFn for CliHistogram {
    fn record(&self, value: f64) {
        let mut values = self.storage.values.write();
        values.entry(self.key.clone()).or_default().push(value);
    }
}

/// Recorder that keeps metrics in memory for a terminal summary.
pub struct CliRecorder {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
    histograms: Arc<HistogramStorage>,
}

impl CliRecorder {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(CounterStorage::default()),
            gauges: Arc::new(GaugeStorage::default()),
            histograms: Arc::new(HistogramStorage::default()),
        }
    }

    /// Install this recorder as the global metrics recorder.
    ///
    /// Returns `None` when a recorder is already installed.
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }

    fn handle(&self) -> CliRecorderHandle {
        CliRecorderHandle {
            counters: Arc::clone(&self.counters),
            gauges: Arc::clone(&self.gauges),
            histograms: Arc::clone(&self.histograms),
        }
    }
}

impl Default for CliRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn key_to_string(key: &Key) -> String {
    let name = key.name();
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{}}}", labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CliCounter {
            key: key_to_string(key),
            storage: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(CliGauge {
            key: key_to_string(key),
            storage: Arc::clone(&self.gauges),
        }))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(CliHistogram {
            key: key_to_string(key),
            storage: Arc::clone(&self.histograms),
        }))
    }
}

/// Read access to what an installed [`CliRecorder`] collected.
pub struct CliRecorderHandle {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
    histograms: Arc<HistogramStorage>,
}

impl CliRecorderHandle {
    pub fn get_counter(&self, key: &str) -> Option<u64> {
        self.counters.values.read().get(key).copied()
    }

    pub fn get_gauge(&self, key: &str) -> Option<f64> {
        self.gauges.values.read().get(key).copied()
    }

    pub fn get_histogram(&self, key: &str) -> Option<Vec<f64>> {
        self.histograms.values.read().get(key).cloned()
    }

    /// Render all collected metrics as a markdown-ish summary.
    pub fn render_summary(&self) -> String {
        let counters = self.counters.values.read();
        let gauges = self.gauges.values.read();
        let histograms = self.histograms.values.read();

        if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
            return "No metrics collected.\n".to_string();
        }

        let mut out = String::from("\n## Metrics Summary\n\n");

        if !counters.is_empty() {
            out.push_str("### Counters\n");
            for (key, value) in sorted(&counters) {
                out.push_str(&format!("  {key}: {value}\n"));
            }
            out.push('\n');
        }

        if !gauges.is_empty() {
            out.push_str("### Gauges\n");
            for (key, value) in sorted(&gauges) {
                out.push_str(&format!("  {key}: {value:.6}\n"));
            }
            out.push('\n');
        }

        if !histograms.is_empty() {
            out.push_str("### Histograms\n");
            for (key, values) in sorted(&histograms) {
                if values.is_empty() {
                    continue;
                }
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let sum: f64 = values.iter().sum();
                #[allow(clippy::cast_precision_loss)]
                let avg = sum / values.len() as f64;
                out.push_str(&format!(
                    "  {key}: count={}, min={min:.6}, max={max:.6}, avg={avg:.6}\n",
                    values.len()
                ));
            }
            out.push('\n');
        }
        out
    }

    pub fn print_summary(&self) {
        print!("{}", self.render_summary());
    }
}

fn sorted<V>(map: &HashMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::Label;

    #[test]
    fn test_key_to_string() {
        let key = Key::from_name("elfdbg_steps_total");
        assert_eq!(key_to_string(&key), "elfdbg_steps_total");

        let key = Key::from_parts("elfdbg_steps_total", vec![Label::new("kind", "over")]);
        assert_eq!(key_to_string(&key), "elfdbg_steps_total{kind=over}");

        let key = Key::from_parts(
            "elfdbg_functions_found_total",
            vec![Label::new("arch", "x86-64"), Label::new("mode", "linear")],
        );
        assert_eq!(
            key_to_string(&key),
            "elfdbg_functions_found_total{arch=x86-64,mode=linear}"
        );
    }

    #[test]
    fn test_recorder_collects_locally() {
        let recorder = CliRecorder::new();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_step(StepKind::Over);
            record_step(StepKind::Over);
            record_breakpoint_hit();
            record_analysis("x86-64", 120, 4, 0.25);
        });

        assert_eq!(handle.get_counter("elfdbg_steps_total{kind=over}"), Some(2));
        assert_eq!(handle.get_counter("elfdbg_breakpoint_hits_total"), Some(1));
        assert_eq!(
            handle.get_counter("elfdbg_instructions_decoded_total{arch=x86-64}"),
            Some(120)
        );
        assert_eq!(
            handle.get_gauge("elfdbg_analysis_time_seconds{arch=x86-64}"),
            Some(0.25)
        );
        assert_eq!(
            handle.get_histogram("elfdbg_analysis_duration_seconds{arch=x86-64}"),
            Some(vec![0.25])
        );

        let summary = handle.render_summary();
        assert!(summary.contains("### Counters"));
        assert!(summary.contains("elfdbg_breakpoint_hits_total: 1"));
    }

    #[test]
    fn test_empty_summary() {
        let recorder = CliRecorder::new();
        assert_eq!(recorder.handle().render_summary(), "No metrics collected.\n");
    }
}
