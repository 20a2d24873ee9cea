use std::collections::VecDeque;
use std::time::Instant;

/// Samples kept in the sliding window; the newest evicts the oldest.
const WINDOW_SIZE: usize = 10;

/// One completed transfer attempt as observed by a worker.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub speed_bps: f64,
    pub latency_ms: f64,
    pub at: Instant,
}

impl Sample {
    pub fn new(speed_bps: f64, latency_ms: f64) -> Self {
        Self {
            speed_bps,
            latency_ms,
            at: Instant::now(),
        }
    }
}

/// Point-in-time view handed to readers; the window itself has a single
/// writer (the controller applying worker events).
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticsSnapshot {
    pub mean_speed_bps: f64,
    pub mean_latency_ms: f64,
    pub latency_stddev_ms: f64,
    pub stability: f64,
    pub samples: usize,
}

/// Sliding window of recent transfer measurements.
#[derive(Debug, Default)]
pub struct NetworkDiagnostics {
    window: VecDeque<Sample>,
}

impl NetworkDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: Sample) {
        if self.window.len() == WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn mean_speed(&self) -> f64 {
        mean(self.window.iter().map(|s| s.speed_bps))
    }

    pub fn mean_latency(&self) -> f64 {
        mean(self.window.iter().map(|s| s.latency_ms))
    }

    /// Sample standard deviation of latency; 0 with fewer than two samples.
    pub fn latency_stddev(&self) -> f64 {
        let n = self.window.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean_latency();
        let variance = self
            .window
            .iter()
            .map(|s| (s.latency_ms - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        variance.sqrt()
    }

    /// `1 - stddev / mean_latency`, clamped to `[0, 1]`. Higher is smoother.
    pub fn stability(&self) -> f64 {
        let mean = self.mean_latency();
        if mean <= 0.0 {
            return 0.0;
        }
        (1.0 - self.latency_stddev() / mean).clamp(0.0, 1.0)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            mean_speed_bps: self.mean_speed(),
            mean_latency_ms: self.mean_latency(),
            latency_stddev_ms: self.latency_stddev(),
            stability: self.stability(),
            samples: self.window.len(),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
