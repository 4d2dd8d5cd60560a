//! Stability classification over a rolling sample window.
//!
//! Load-cell output is noisy, so the verdict is a bounded max-min spread over
//! the last N samples with a minimum dwell time, not a derivative. A single
//! outlier keeps the verdict `false` until it leaves the window; false
//! negatives are preferred over false positives.

use std::collections::VecDeque;

pub const WINDOW_CAPACITY: usize = 12;
pub const MIN_STABLE_MS: u64 = 1_500;
pub const EPS_GRAMS: f64 = 0.5;

/// One weight observation on the coordinator's millisecond timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value_g: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityCfg {
    pub window: usize,
    pub min_stable_ms: u64,
    pub eps_grams: f64,
}

impl Default for StabilityCfg {
    fn default() -> Self {
        Self {
            window: WINDOW_CAPACITY,
            min_stable_ms: MIN_STABLE_MS,
            eps_grams: EPS_GRAMS,
        }
    }
}

/// Fixed-capacity, insertion-ordered window; oldest sample evicted first.
///
/// Timestamps are kept non-decreasing: a sample stamped earlier than the
/// newest one is clamped to the newest timestamp.
#[derive(Debug, Clone)]
pub struct StabilityWindow {
    buf: VecDeque<Sample>,
    capacity: usize,
}

impl StabilityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, mut sample: Sample) {
        if let Some(last) = self.buf.back() {
            sample.timestamp_ms = sample.timestamp_ms.max(last.timestamp_ms);
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    /// Newest minus oldest timestamp; 0 when fewer than two samples.
    pub fn span_ms(&self) -> u64 {
        match (self.buf.front(), self.buf.back()) {
            (Some(a), Some(b)) => b.timestamp_ms.saturating_sub(a.timestamp_ms),
            _ => 0,
        }
    }

    /// Max minus min of the values, `None` when empty.
    pub fn range_g(&self) -> Option<f64> {
        let mut it = self.buf.iter().map(|s| s.value_g);
        let first = it.next()?;
        let (lo, hi) = it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Some(hi - lo)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.buf.iter()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Verdict for `window`, or `previous` when the window cannot decide yet
/// (not full, or spanning less than `min_stable_ms`).
pub fn classify(window: &StabilityWindow, cfg: &StabilityCfg, previous: bool) -> bool {
    if window.len() < cfg.window {
        return previous;
    }
    if window.span_ms() < cfg.min_stable_ms {
        return previous;
    }
    match window.range_g() {
        Some(range) => range < cfg.eps_grams,
        None => previous,
    }
}

/// Window plus the last verdict.
#[derive(Debug, Clone)]
pub struct StabilityEstimator {
    cfg: StabilityCfg,
    window: StabilityWindow,
    verdict: bool,
}

impl StabilityEstimator {
    pub fn new(cfg: StabilityCfg) -> Self {
        Self {
            window: StabilityWindow::new(cfg.window),
            cfg,
            verdict: false,
        }
    }

    /// Record a sample and return the verdict for it. An explicit backend
    /// verdict wins over the window.
    pub fn observe(&mut self, sample: Sample, explicit: Option<bool>) -> bool {
        self.window.push(sample);
        self.verdict = match explicit {
            Some(v) => v,
            None => classify(&self.window, &self.cfg, self.verdict),
        };
        self.verdict
    }

    pub fn verdict(&self) -> bool {
        self.verdict
    }

    pub fn window(&self) -> &StabilityWindow {
        &self.window
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.verdict = false;
    }
}
