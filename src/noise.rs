//! Random-force sources: white noise today, correlated noise as a seam.
//!
//! The force assembly consumes Gaussian draws through the [`GaussianSource`]
//! trait and nothing else, so the default delta-correlated thermostat and a
//! future non-Markovian (memory-kernel) source are interchangeable from the
//! assembly's point of view.
//!
//! The correlated source is specified here only at the interface level:
//! [`NoiseCorrelation`] exposes the Cholesky factor of the distance-dependent
//! covariance, and [`forward_dft`] / [`inverse_dft`] convert a time-domain
//! memory-kernel sample sequence to and from its frequency-domain
//! representation. The sampling recurrence that would sit behind these pieces
//! is intentionally not implemented here.

use faer::Mat;
use num_complex::Complex64;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::error::{DpdError, DpdErrorKind};

/// A stream of independent standard Gaussian draws, exclusive to one
/// partition. One draw is consumed per pair per full-mode evaluation.
pub trait GaussianSource {
    /// Next zero-mean, unit-variance draw.
    fn next_gaussian(&mut self) -> f64;
}

/// Delta-correlated (Markovian) noise backed by a seeded PRNG.
#[derive(Debug, Clone)]
pub struct WhiteNoise {
    rng: StdRng,
}

impl WhiteNoise {
    /// Creates a stream from a positive base seed.
    pub fn from_seed(seed: i32) -> Result<Self, DpdError> {
        Self::for_partition(seed, 0)
    }

    /// Creates the stream for one partition, offsetting the base seed by the
    /// partition rank so that no two partitions draw correlated sequences.
    pub fn for_partition(seed: i32, rank: usize) -> Result<Self, DpdError> {
        if seed <= 0 {
            return Err(
                DpdErrorKind::InvalidParameter(format!("seed must be positive, got {seed}")).into(),
            );
        }
        Ok(Self {
            rng: StdRng::seed_from_u64(seed as u64 + rank as u64),
        })
    }
}

impl GaussianSource for WhiteNoise {
    #[inline]
    fn next_gaussian(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }
}

/// Distance-dependent second moment of a correlated noise source.
///
/// An implementation refreshes its internal kernel state as interparticle
/// distances evolve and hands the assembly a Cholesky factor of the noise
/// covariance for a pair at the given distance. The white-noise
/// implementation is the degenerate delta kernel.
pub trait NoiseCorrelation {
    /// Lower-triangular Cholesky factor of the noise covariance for a pair at
    /// distance `pair_distance`.
    fn chol_factor(&self, pair_distance: f64) -> Mat<f64>;
}

impl NoiseCorrelation for WhiteNoise {
    /// The delta kernel has unit covariance: a 1x1 identity factor,
    /// independent of distance.
    fn chol_factor(&self, _pair_distance: f64) -> Mat<f64> {
        Mat::from_fn(1, 1, |_, _| 1.0)
    }
}

/// Discrete Fourier transform of a real time-domain sample sequence.
///
/// Plain O(N^2) evaluation; kernel sample counts are small and the transform
/// runs only at kernel-refresh intervals, far from any hot loop.
pub fn forward_dft(samples: &[f64]) -> Vec<Complex64> {
    let n = samples.len();
    (0..n)
        .map(|k| {
            let mut acc = Complex64::new(0.0, 0.0);
            for (t, &x) in samples.iter().enumerate() {
                let angle = -2.0 * PI * (k * t) as f64 / n as f64;
                acc += Complex64::from_polar(x, angle);
            }
            acc
        })
        .collect()
}

/// Inverse discrete Fourier transform, returning the real and imaginary parts
/// of the time-domain sequence separately. For a spectrum that came from a
/// real sequence the imaginary part is numerical noise, and keeping it
/// visible lets callers assert exactly that.
pub fn inverse_dft(spectrum: &[Complex64]) -> (Vec<f64>, Vec<f64>) {
    let n = spectrum.len();
    let mut real = Vec::with_capacity(n);
    let mut imag = Vec::with_capacity(n);
    for t in 0..n {
        let mut acc = Complex64::new(0.0, 0.0);
        for (k, &xk) in spectrum.iter().enumerate() {
            let angle = 2.0 * PI * (k * t) as f64 / n as f64;
            acc += xk * Complex64::from_polar(1.0, angle);
        }
        real.push(acc.re / n as f64);
        imag.push(acc.im / n as f64);
    }
    (real, imag)
}
