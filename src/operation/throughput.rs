// Exponential moving average for wipe throughput.
//
// Fed explicit (bytes, seconds) deltas by the operation driver so the
// estimate never depends on wall-clock reads of its own; tests drive time
// synthetically.

/// Smoothed bytes-per-second estimate over executor progress samples.
#[derive(Debug, Clone)]
pub struct ThroughputEma {
    alpha: f64,
    current: Option<f64>,
}

/// Default smoothing factor applied to each new sample.
pub const DEFAULT_SMOOTHING: f64 = 0.3;

impl ThroughputEma {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            current: None,
        }
    }

    /// Fold one progress sample into the estimate and return the updated
    /// bytes-per-second value. Samples with a non-positive time delta are
    /// ignored (duplicate or reordered progress callbacks).
    pub fn update(&mut self, delta_bytes: u64, delta_secs: f64) -> f64 {
        if delta_secs <= 0.0 {
            return self.bytes_per_sec();
        }
        let instantaneous = delta_bytes as f64 / delta_secs;
        self.current = Some(match self.current {
            None => instantaneous,
            Some(previous) => self.alpha * instantaneous + (1.0 - self.alpha) * previous,
        });
        self.bytes_per_sec()
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.current.unwrap_or(0.0)
    }
}

impl Default for ThroughputEma {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}
