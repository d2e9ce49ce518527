//! Frame-rate sampling and the shared pipeline counters.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default number of timestamps per rate sample.
pub const DEFAULT_WINDOW: usize = 10;

/// Fixed-capacity ring of millisecond timestamps.
///
/// The rate is sampled, not smoothed: it is recomputed only when the write
/// index wraps, as `capacity * 1000 / (newest - oldest)` over the timestamps
/// of the wrap that just completed. Before the first wrap the rate is unknown.
#[derive(Clone, Debug)]
pub struct RateWindow {
    times: Vec<u64>,
    index: usize,
    rate: Option<f32>,
}

impl RateWindow {
    /// `capacity` is clamped to at least 2.
    pub fn new(capacity: usize) -> Self {
        Self {
            times: vec![0; capacity.max(2)],
            index: 0,
            rate: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.times.len()
    }

    /// Record one event. Returns the new rate when this record completed a wrap.
    pub fn record(&mut self, timestamp_ms: u64) -> Option<f32> {
        self.times[self.index] = timestamp_ms;
        self.index += 1;
        if self.index < self.times.len() {
            return None;
        }
        self.index = 0;
        let oldest = self.times[0];
        let newest = self.times[self.times.len() - 1];
        let span = newest.saturating_sub(oldest);
        if span == 0 {
            log::debug!("rate window wrapped with zero time span, keeping previous rate");
            return None;
        }
        let rate = self.times.len() as f32 * 1000.0 / span as f32;
        self.rate = Some(rate);
        Some(rate)
    }

    /// Last sampled rate in events per second.
    pub fn rate(&self) -> Option<f32> {
        self.rate
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Counters shared between the capture callback and the analysis thread.
#[derive(Debug)]
pub struct PipelineMetrics {
    inner: Mutex<MetricsState>,
}

#[derive(Debug)]
struct MetricsState {
    capture: RateWindow,
    analysis: RateWindow,
    last_analysis_ms: u64,
    last_capture_timestamp: u64,
    last_capture_wall_ms: u64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub capture_rate: Option<f32>,
    pub analysis_rate: Option<f32>,
    pub last_analysis_ms: u64,
    pub last_capture_timestamp: u64,
    pub last_capture_wall_ms: u64,
}

impl PipelineMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            inner: Mutex::new(MetricsState {
                capture: RateWindow::new(window),
                analysis: RateWindow::new(window),
                last_analysis_ms: 0,
                last_capture_timestamp: 0,
                last_capture_wall_ms: 0,
            }),
        }
    }

    /// Called from the capture callback; keep it short.
    pub fn record_capture(&self, timestamp: u64, wall_ms: u64) {
        if let Ok(mut state) = self.inner.lock() {
            state.capture.record(wall_ms);
            state.last_capture_timestamp = timestamp;
            state.last_capture_wall_ms = wall_ms;
        }
    }

    pub fn record_analysis_tick(&self, wall_ms: u64) {
        if let Ok(mut state) = self.inner.lock() {
            state.analysis.record(wall_ms);
        }
    }

    pub fn record_analysis_latency(&self, elapsed_ms: u64) {
        if let Ok(mut state) = self.inner.lock() {
            state.last_analysis_ms = elapsed_ms;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.inner.lock() {
            Ok(state) => MetricsSnapshot {
                capture_rate: state.capture.rate(),
                analysis_rate: state.analysis.rate(),
                last_analysis_ms: state.last_analysis_ms,
                last_capture_timestamp: state.last_capture_timestamp,
                last_capture_wall_ms: state.last_capture_wall_ms,
            },
            Err(_) => MetricsSnapshot::default(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_unknown_until_window_fills() {
        let mut window = RateWindow::new(10);
        for i in 0..9 {
            assert_eq!(window.record(i * 100), None);
            assert_eq!(window.rate(), None);
        }
        let rate = window.record(900).unwrap();
        assert!((rate - 11.111).abs() < 0.01, "rate was {rate}");
        assert_eq!(window.rate(), Some(rate));
    }

    #[test]
    fn rate_is_sampled_per_wrap() {
        let mut window = RateWindow::new(4);
        for t in [0, 100, 200, 300] {
            window.record(t);
        }
        let first = window.rate().unwrap();
        // Mid-wrap records do not move the rate.
        window.record(1000);
        window.record(2000);
        assert_eq!(window.rate(), Some(first));
        window.record(3000);
        let second = window.record(4000).unwrap();
        assert!((second - 4.0 * 1000.0 / 3000.0).abs() < 1e-3);
    }

    #[test]
    fn zero_span_keeps_previous_rate() {
        let mut window = RateWindow::new(2);
        window.record(0);
        let rate = window.record(500);
        assert_eq!(rate, Some(4.0));
        window.record(700);
        assert_eq!(window.record(700), None);
        assert_eq!(window.rate(), Some(4.0));
    }

    #[test]
    fn metrics_snapshot_reflects_records() {
        let metrics = PipelineMetrics::new(2);
        metrics.record_capture(42, 1000);
        metrics.record_capture(43, 1100);
        metrics.record_analysis_latency(17);
        let snap = metrics.snapshot();
        assert_eq!(snap.capture_rate, Some(20.0));
        assert_eq!(snap.analysis_rate, None);
        assert_eq!(snap.last_analysis_ms, 17);
        assert_eq!(snap.last_capture_timestamp, 43);
    }
}
