// Running statistics for simulation measurements
//
// Samples are folded into a Welford accumulator; no raw samples are kept.
// Collection is gated by an explicit SampleGate handle passed at construction,
// so a harness can, e.g., keep the gate closed during warm-up.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Shared on/off switch for sample collection.
///
/// Clones share the same flag.
#[derive(Clone, Debug)]
pub struct SampleGate {
    open: Rc<Cell<bool>>,
}

impl SampleGate {
    pub fn new(open: bool) -> Self {
        Self {
            open: Rc::new(Cell::new(open)),
        }
    }

    pub fn open(&self) {
        self.open.set(true);
    }

    pub fn close(&self) {
        self.open.set(false);
    }

    pub fn is_open(&self) -> bool {
        self.open.get()
    }
}

impl Default for SampleGate {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Running count / mean / variance of a discrete sample stream.
#[derive(Clone, Debug)]
pub struct Discrete {
    gate: SampleGate,
    count: u64,
    mean: f64,
    // sum of squared deviations from the mean
    m2: f64,
}

impl Discrete {
    pub fn new(gate: SampleGate) -> Self {
        Self {
            gate,
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Record a sample; ignored while the gate is closed.
    pub fn add(&mut self, sample: f64) {
        if !self.gate.is_open() {
            return;
        }

        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// 0.0 when empty
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (n - 1 denominator); 0.0 below two samples
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl fmt::Display for Discrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} ± {:.4} (n={})",
            self.mean(),
            self.std_dev(),
            self.count
        )
    }
}

/// Query outcome collectors shared by every user of a run.
#[derive(Clone)]
pub struct UserStats {
    /// Seconds between issuing a query and receiving its data
    pub durations: Rc<RefCell<Discrete>>,
    /// 1.0 per answered query, 0.0 per timed out or abandoned one
    pub successes: Rc<RefCell<Discrete>>,
}

impl UserStats {
    pub fn new(gate: &SampleGate) -> Self {
        Self {
            durations: Rc::new(RefCell::new(Discrete::new(gate.clone()))),
            successes: Rc::new(RefCell::new(Discrete::new(gate.clone()))),
        }
    }

    pub fn record_success(&self, waited_secs: f64) {
        self.durations.borrow_mut().add(waited_secs);
        self.successes.borrow_mut().add(1.0);
    }

    pub fn record_failure(&self) {
        self.successes.borrow_mut().add(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        let mut d = Discrete::new(SampleGate::default());
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            d.add(x);
        }

        assert_eq!(d.count(), 8);
        assert!((d.mean() - 5.0).abs() < 1e-12);
        // population variance is 4, sample variance is 32/7
        assert!((d.variance() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_and_single_sample() {
        let mut d = Discrete::new(SampleGate::default());
        assert_eq!(d.count(), 0);
        assert_eq!(d.mean(), 0.0);
        assert_eq!(d.variance(), 0.0);

        d.add(3.5);
        assert_eq!(d.mean(), 3.5);
        assert_eq!(d.variance(), 0.0);
    }

    #[test]
    fn test_closed_gate_drops_samples() {
        let gate = SampleGate::new(false);
        let mut d = Discrete::new(gate.clone());

        d.add(100.0);
        assert_eq!(d.count(), 0);

        gate.open();
        d.add(1.0);
        d.add(3.0);
        assert_eq!(d.count(), 2);
        assert_eq!(d.mean(), 2.0);

        gate.close();
        d.add(1000.0);
        assert_eq!(d.count(), 2);
    }

    #[test]
    fn test_user_stats_share_gate() {
        let gate = SampleGate::new(true);
        let stats = UserStats::new(&gate);

        stats.record_success(0.25);
        stats.record_failure();
        gate.close();
        stats.record_failure();

        assert_eq!(stats.durations.borrow().count(), 1);
        assert_eq!(stats.successes.borrow().count(), 2);
        assert_eq!(stats.successes.borrow().mean(), 0.5);
    }

    #[test]
    fn test_display() {
        let mut d = Discrete::new(SampleGate::default());
        d.add(1.0);
        d.add(3.0);
        assert_eq!(d.to_string(), "2.0000 ± 1.4142 (n=2)");
    }
}
