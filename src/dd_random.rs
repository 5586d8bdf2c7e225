// Random-variable samplers
//
// Every sampler draws from a SharedRng, so a whole simulation run is
// reproducible from a single seed. Samplers take &self: they are shared
// between users and activities and only the RNG behind them mutates.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::dd_interface::SimDuration;

pub type SharedRng = Rc<RefCell<StdRng>>;

pub fn seeded_rng(seed: u64) -> SharedRng {
    Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
}

pub trait DurationSampler {
    fn next_sample(&self) -> SimDuration;
}

pub trait Float64Sampler {
    fn next_sample(&self) -> f64;
}

pub trait Permutator {
    /// A permutation of `0..n`
    fn perm(&self, n: usize) -> Vec<usize>;
}

pub trait Intner {
    /// Uniform integer in `[0, n)`; `n` must be positive
    fn intn(&self, n: usize) -> usize;
}

// ============================================================================
// Durations
// ============================================================================

pub struct ConstantDuration(pub SimDuration);

impl DurationSampler for ConstantDuration {
    fn next_sample(&self) -> SimDuration {
        self.0
    }
}

/// Uniform over `[min, max]`
pub struct UniformDuration {
    rng: SharedRng,
    min: SimDuration,
    max: SimDuration,
}

impl UniformDuration {
    pub fn new(rng: SharedRng, min: SimDuration, max: SimDuration) -> Self {
        assert!(min <= max, "empty duration range [{}, {}]", min, max);
        Self { rng, min, max }
    }
}

impl DurationSampler for UniformDuration {
    fn next_sample(&self) -> SimDuration {
        self.rng.borrow_mut().gen_range(self.min..=self.max)
    }
}

/// Exponentially distributed with the given mean (inverse transform).
pub struct ExponentialDuration {
    rng: SharedRng,
    mean: SimDuration,
}

impl ExponentialDuration {
    pub fn new(rng: SharedRng, mean: SimDuration) -> Self {
        assert!(mean >= 0, "negative mean duration {}", mean);
        Self { rng, mean }
    }
}

impl DurationSampler for ExponentialDuration {
    fn next_sample(&self) -> SimDuration {
        // u in [0, 1) so 1 - u is in (0, 1] and the log is finite
        let u: f64 = self.rng.borrow_mut().gen();
        (-(1.0 - u).ln() * self.mean as f64).round() as SimDuration
    }
}

// ============================================================================
// Floats
// ============================================================================

pub struct ConstantFloat(pub f64);

impl Float64Sampler for ConstantFloat {
    fn next_sample(&self) -> f64 {
        self.0
    }
}

/// Uniform over `[min, max)`; degenerates to `min` when the range is empty.
pub struct UniformFloat {
    rng: SharedRng,
    min: f64,
    max: f64,
}

impl UniformFloat {
    pub fn new(rng: SharedRng, min: f64, max: f64) -> Self {
        Self { rng, min, max }
    }
}

impl Float64Sampler for UniformFloat {
    fn next_sample(&self) -> f64 {
        if self.min >= self.max {
            return self.min;
        }
        self.rng.borrow_mut().gen_range(self.min..self.max)
    }
}

// ============================================================================
// Indices
// ============================================================================

pub struct RngPermutator {
    rng: SharedRng,
}

impl RngPermutator {
    pub fn new(rng: SharedRng) -> Self {
        Self { rng }
    }
}

impl Permutator for RngPermutator {
    fn perm(&self, n: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut *self.rng.borrow_mut());
        indices
    }
}

pub struct RngIntner {
    rng: SharedRng,
}

impl RngIntner {
    pub fn new(rng: SharedRng) -> Self {
        Self { rng }
    }
}

impl Intner for RngIntner {
    fn intn(&self, n: usize) -> usize {
        self.rng.borrow_mut().gen_range(0..n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dd_interface::ms;

    #[test]
    fn test_same_seed_same_samples() {
        let a = UniformDuration::new(seeded_rng(5), ms(1), ms(100));
        let b = UniformDuration::new(seeded_rng(5), ms(1), ms(100));

        let xs: Vec<_> = (0..20).map(|_| a.next_sample()).collect();
        let ys: Vec<_> = (0..20).map(|_| b.next_sample()).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|x| (ms(1)..=ms(100)).contains(x)));
    }

    #[test]
    fn test_perm_is_a_permutation() {
        let permutator = RngPermutator::new(seeded_rng(11));
        let mut perm = permutator.perm(50);
        assert_eq!(perm.len(), 50);

        perm.sort_unstable();
        assert_eq!(perm, (0..50).collect::<Vec<_>>());
        assert!(permutator.perm(0).is_empty());
    }

    #[test]
    fn test_intn_in_range() {
        let intner = RngIntner::new(seeded_rng(3));
        for _ in 0..1000 {
            assert!(intner.intn(7) < 7);
        }
        assert_eq!(intner.intn(1), 0);
    }

    #[test]
    fn test_exponential_mean_is_close() {
        let sampler = ExponentialDuration::new(seeded_rng(17), ms(100));
        let n = 20_000;
        let total: i64 = (0..n).map(|_| sampler.next_sample()).sum();
        let mean = total as f64 / n as f64;

        assert!((mean - ms(100) as f64).abs() < ms(5) as f64, "mean {}", mean);
    }

    #[test]
    fn test_uniform_float_degenerate_range() {
        let sampler = UniformFloat::new(seeded_rng(1), 0.5, 0.5);
        assert_eq!(sampler.next_sample(), 0.5);

        let sampler = UniformFloat::new(seeded_rng(1), 0.0, 1.0);
        let x = sampler.next_sample();
        assert!((0.0..1.0).contains(&x));
    }

    #[test]
    fn test_shared_rng_interleaves_deterministically() {
        let run = || {
            let rng = seeded_rng(23);
            let durations = UniformDuration::new(rng.clone(), 0, ms(10));
            let intner = RngIntner::new(rng);
            (0..10)
                .map(|_| (durations.next_sample(), intner.intn(100)))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
