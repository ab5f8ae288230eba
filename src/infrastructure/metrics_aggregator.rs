//! Metrics Aggregator
//!
//! Cumulative request counters, a fixed response-time histogram, a rolling
//! window of raw samples for percentile statistics, and a bounded history
//! of system resource readings.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// Histogram bucket labels. Upper edges are exclusive.
pub const HISTOGRAM_BUCKETS: [&str; 7] = [
    "0-50", "50-100", "100-200", "200-500", "500-1000", "1000-2000", "2000+",
];

const HISTOGRAM_EDGES: [u64; 6] = [50, 100, 200, 500, 1000, 2000];

/// Placeholder substituted for identifier-like path segments.
pub const ID_PLACEHOLDER: &str = ":id";

/// Service name for paths outside `/api/`.
pub const OTHER_SERVICE: &str = "other";

/// Aggregator configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Span of the rolling response-time window
    pub window: Duration,
    /// Number of system samples kept
    pub system_history: usize,
    /// Interval between system samples
    pub system_sample_interval: Duration,
    /// Interval of the periodic snapshot log line
    pub snapshot_log_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            system_history: 60,
            system_sample_interval: Duration::from_secs(60),
            snapshot_log_interval: Duration::from_secs(60),
        }
    }
}

/// One system resource reading.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemSample {
    pub timestamp: DateTime<Utc>,
    /// Percent, averaged over all cores
    pub cpu_usage: f64,
    /// Percent of total memory in use
    pub memory_usage: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

/// Statistics over the rolling window.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ResponseTimeStats {
    pub count: usize,
    pub min: u64,
    pub max: u64,
    pub avg: f64,
    pub median: u64,
    pub p95: u64,
    pub p99: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistogramBucket {
    pub bucket: &'static str,
    pub count: u64,
}

/// JSON-serializable view of the aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    /// Percent of requests answered with status >= 400
    pub error_rate: f64,
    pub requests_by_status: BTreeMap<u16, u64>,
    pub requests_by_method: BTreeMap<String, u64>,
    pub requests_by_path: BTreeMap<String, u64>,
    pub requests_by_service: BTreeMap<String, u64>,
    pub histogram: Vec<HistogramBucket>,
    pub response_times: ResponseTimeStats,
    pub system: Option<SystemSample>,
    pub system_history: Vec<SystemSample>,
    pub health_score: f64,
}

struct MetricsState {
    started_at: Instant,
    total_requests: u64,
    total_errors: u64,
    by_status: BTreeMap<u16, u64>,
    by_method: BTreeMap<String, u64>,
    by_path: BTreeMap<String, u64>,
    by_service: BTreeMap<String, u64>,
    histogram: [u64; 7],
    window: VecDeque<(Instant, u64)>,
    system: VecDeque<SystemSample>,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: 0,
            total_errors: 0,
            by_status: BTreeMap::new(),
            by_method: BTreeMap::new(),
            by_path: BTreeMap::new(),
            by_service: BTreeMap::new(),
            histogram: [0; 7],
            window: VecDeque::new(),
            system: VecDeque::new(),
        }
    }

    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64 * 100.0
        }
    }

    fn stats(&self) -> ResponseTimeStats {
        let mut sorted: Vec<u64> = self.window.iter().map(|(_, ms)| *ms).collect();
        if sorted.is_empty() {
            return ResponseTimeStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        ResponseTimeStats {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            avg: sum as f64 / count as f64,
            median: percentile(&sorted, 0.5),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Index selection `floor(len * p)` into a sorted slice, no interpolation.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    let idx = ((sorted.len() as f64) * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn bucket_index(ms: u64) -> usize {
    HISTOGRAM_EDGES
        .iter()
        .position(|edge| ms < *edge)
        .unwrap_or(HISTOGRAM_EDGES.len())
}

fn is_identifier(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    if segment.len() == 24 && segment.bytes().all(|b| b.is_ascii_hexdigit()) {
        return true;
    }
    segment.len() == 36 && uuid::Uuid::parse_str(segment).is_ok()
}

/// Rewrite numeric, 24-hex and UUID segments to [`ID_PLACEHOLDER`].
///
/// # Examples
/// ```
/// use gateway_core::infrastructure::metrics_aggregator::normalize_path;
///
/// assert_eq!(normalize_path("/api/users/42/orders"), "/api/users/:id/orders");
/// ```
pub fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    path.split('/')
        .map(|segment| {
            if is_identifier(segment) {
                ID_PLACEHOLDER
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// First path segment after `/api/`, or [`OTHER_SERVICE`].
pub fn service_of(path: &str) -> String {
    path.strip_prefix("/api/")
        .and_then(|rest| rest.split(['/', '?']).next())
        .filter(|s| !s.is_empty())
        .unwrap_or(OTHER_SERVICE)
        .to_string()
}

/// Request and system metrics for one gateway instance.
pub struct MetricsAggregator {
    config: MetricsConfig,
    state: Mutex<MetricsState>,
}

impl MetricsAggregator {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MetricsState::new()),
        }
    }

    /// Record one completed request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, response_time_ms: u64) {
        let now = Instant::now();
        let normalized = normalize_path(path);
        let service = service_of(path);

        let mut state = self.state.lock();
        state.total_requests += 1;
        if status >= 400 {
            state.total_errors += 1;
        }
        *state.by_status.entry(status).or_default() += 1;
        *state.by_method.entry(method.to_uppercase()).or_default() += 1;
        *state.by_path.entry(normalized).or_default() += 1;
        *state.by_service.entry(service).or_default() += 1;
        state.histogram[bucket_index(response_time_ms)] += 1;

        state.window.push_back((now, response_time_ms));
        state.prune(self.config.window, now);
    }

    /// Push a system reading, dropping the oldest past the history size.
    pub fn record_system_sample(&self, sample: SystemSample) {
        let mut state = self.state.lock();
        state.system.push_back(sample);
        while state.system.len() > self.config.system_history.max(1) {
            state.system.pop_front();
        }
    }

    pub fn response_time_stats(&self) -> ResponseTimeStats {
        let mut state = self.state.lock();
        state.prune(self.config.window, Instant::now());
        state.stats()
    }

    pub fn error_rate(&self) -> f64 {
        self.state.lock().error_rate()
    }

    pub fn total_requests(&self) -> u64 {
        self.state.lock().total_requests
    }

    /// Derived health score in `[0, 100]`.
    pub fn health_score(&self) -> f64 {
        let mut state = self.state.lock();
        state.prune(self.config.window, Instant::now());
        let stats = state.stats();
        let memory = state.system.back().map(|s| s.memory_usage);
        compute_health_score(state.error_rate(), &stats, memory)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut state = self.state.lock();
        state.prune(self.config.window, Instant::now());

        let response_times = state.stats();
        let error_rate = state.error_rate();
        let system = state.system.back().cloned();
        let health_score =
            compute_health_score(error_rate, &response_times, system.as_ref().map(|s| s.memory_usage));

        MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_secs: state.started_at.elapsed().as_secs(),
            total_requests: state.total_requests,
            total_errors: state.total_errors,
            error_rate,
            requests_by_status: state.by_status.clone(),
            requests_by_method: state.by_method.clone(),
            requests_by_path: state.by_path.clone(),
            requests_by_service: state.by_service.clone(),
            histogram: HISTOGRAM_BUCKETS
                .iter()
                .zip(state.histogram.iter())
                .map(|(bucket, count)| HistogramBucket {
                    bucket: *bucket,
                    count: *count,
                })
                .collect(),
            response_times,
            system,
            system_history: state.system.iter().cloned().collect(),
            health_score,
        }
    }

    /// Clear every counter, the window and the system history.
    pub fn reset(&self) {
        *self.state.lock() = MetricsState::new();
        tracing::info!("metrics reset");
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

fn compute_health_score(error_rate: f64, stats: &ResponseTimeStats, memory_usage: Option<f64>) -> f64 {
    let mut score = 100.0;

    score -= (error_rate * 3.0).min(30.0);

    if stats.avg > 2000.0 {
        score -= 20.0;
    } else if stats.avg > 1000.0 {
        score -= 10.0;
    }

    if stats.p95 > 3000 {
        score -= 10.0;
    }

    match memory_usage {
        Some(m) if m > 90.0 => score -= 20.0,
        Some(m) if m > 80.0 => score -= 10.0,
        _ => {}
    }

    f64::max(score, 0.0)
}
