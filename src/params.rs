//! Global settings and the per-type-pair coefficient table.
//!
//! Coefficients are keyed by an unordered pair of particle types and are
//! assigned during setup, possibly over ranges of types at once. The table is
//! split into two stages to encode the central configuration invariant in the
//! type system:
//!
//! * [`PairTableBuilder`] holds raw, possibly incomplete assignments and is
//!   what the restart codec reads and writes;
//! * [`PairTable`] is the finalized, fully populated symmetric grid with the
//!   derived noise strength, and is the only form the force assembly accepts.
//!
//! Finalization fails if any pair was never set. The noise strength is not a
//! free parameter: it is derived from the friction coefficient and the target
//! temperature as `sigma = sqrt(2 kB T gamma)`, which is the
//! fluctuation-dissipation relation that makes the thermostat sample the
//! correct equilibrium distribution.

use std::ops::RangeInclusive;

use crate::comm::Collective;
use crate::error::{DpdError, DpdErrorKind};

/// Mixing-rule selector. This pair style never mixes (every pair must be set
/// explicitly), but the selector is part of the persisted settings block, so
/// it is carried for restart compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixRule {
    #[default]
    Geometric,
    Arithmetic,
}

impl MixRule {
    pub(crate) fn as_i32(self) -> i32 {
        match self {
            MixRule::Geometric => 0,
            MixRule::Arithmetic => 1,
        }
    }

    pub(crate) fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(MixRule::Geometric),
            1 => Some(MixRule::Arithmetic),
            _ => None,
        }
    }
}

/// Global scalar settings of the pair style: target temperature, default
/// cutoff, random seed, and the mixing-rule selector.
///
/// The Boltzmann constant is deliberately not a field: it belongs to the
/// external unit system and is passed explicitly where the derived noise
/// strength is computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub temperature: f64,
    pub cut_global: f64,
    /// Base random seed. Each partition offsets this by its rank so that no
    /// two partitions share a generator stream.
    pub seed: i32,
    pub mix: MixRule,
}

impl Settings {
    /// Validates and creates the settings block.
    pub fn new(temperature: f64, cut_global: f64, seed: i32) -> Result<Self, DpdError> {
        if !(temperature >= 0.0) {
            return Err(DpdErrorKind::InvalidParameter(format!(
                "temperature must be non-negative, got {temperature}"
            ))
            .into());
        }
        if !(cut_global > 0.0) {
            return Err(DpdErrorKind::InvalidParameter(format!(
                "global cutoff must be positive, got {cut_global}"
            ))
            .into());
        }
        if seed <= 0 {
            return Err(
                DpdErrorKind::InvalidParameter(format!("seed must be positive, got {seed}")).into(),
            );
        }
        Ok(Self {
            temperature,
            cut_global,
            seed,
            mix: MixRule::default(),
        })
    }

    /// Synchronizes the scalar settings from rank 0 across all partitions.
    /// With a single-rank collective this is the identity.
    pub fn synchronize<C: Collective>(&mut self, comm: &C) -> Result<(), DpdError> {
        self.temperature = comm.broadcast_f64(self.temperature);
        self.cut_global = comm.broadcast_f64(self.cut_global);
        self.seed = comm.broadcast_i32(self.seed);
        let mix = comm.broadcast_i32(self.mix.as_i32());
        self.mix = MixRule::from_i32(mix).ok_or_else(|| {
            DpdErrorKind::InvalidParameter(format!("broadcast mixing-rule selector {mix} is invalid"))
        })?;
        Ok(())
    }
}

/// Raw coefficients of one type pair as assigned during setup, before the
/// noise strength is derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPair {
    pub a0: f64,
    pub gamma: f64,
    pub cut: f64,
}

/// Finalized coefficients of one type pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairCoeffs {
    /// Conservative force strength.
    pub a0: f64,
    /// Friction (dissipative) coefficient.
    pub gamma: f64,
    /// Derived random-force strength, `sqrt(2 kB T gamma)`.
    pub sigma: f64,
    /// Interaction cutoff radius.
    pub cut: f64,
}

/// Incrementally populated coefficient table, keyed by unordered type pairs.
#[derive(Debug, Clone)]
pub struct PairTableBuilder {
    n_types: usize,
    // Upper-triangular storage: entry (i, j) with i <= j lives at
    // i * n_types - i * (i - 1) / 2 + (j - i).
    entries: Vec<Option<RawPair>>,
}

impl PairTableBuilder {
    pub fn new(n_types: usize) -> Self {
        let n_pairs = n_types * (n_types + 1) / 2;
        Self {
            n_types,
            entries: vec![None; n_pairs],
        }
    }

    pub fn n_types(&self) -> usize {
        self.n_types
    }

    fn index(&self, i: usize, j: usize) -> usize {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        lo * self.n_types - lo * (lo + 1) / 2 + hi
    }

    fn check_type(&self, t: usize) -> Result<(), DpdError> {
        if t >= self.n_types {
            return Err(DpdErrorKind::InvalidParameter(format!(
                "type {t} is out of range for a table over {} types",
                self.n_types
            ))
            .into());
        }
        Ok(())
    }

    /// Assigns coefficients to the unordered pair `(i, j)`.
    pub fn set(&mut self, i: usize, j: usize, a0: f64, gamma: f64, cut: f64) -> Result<(), DpdError> {
        self.check_type(i)?;
        self.check_type(j)?;
        if !(cut > 0.0) {
            return Err(DpdErrorKind::InvalidParameter(format!(
                "pair cutoff must be positive, got {cut}"
            ))
            .into());
        }
        if gamma < 0.0 {
            return Err(DpdErrorKind::InvalidParameter(format!(
                "friction coefficient must be non-negative, got {gamma}"
            ))
            .into());
        }
        let idx = self.index(i, j);
        self.entries[idx] = Some(RawPair { a0, gamma, cut });
        Ok(())
    }

    /// Assigns the same coefficients to every unordered pair `(i, j)` with
    /// `i` in `itypes`, `j` in `jtypes`, and `j >= i`. Fails if the ranges
    /// select no pair at all.
    pub fn set_block(
        &mut self,
        itypes: RangeInclusive<usize>,
        jtypes: RangeInclusive<usize>,
        a0: f64,
        gamma: f64,
        cut: f64,
    ) -> Result<usize, DpdError> {
        let mut count = 0;
        for i in itypes {
            for j in jtypes.clone() {
                if j < i {
                    continue;
                }
                self.set(i, j, a0, gamma, cut)?;
                count += 1;
            }
        }
        if count == 0 {
            return Err(DpdErrorKind::InvalidParameter(
                "coefficient ranges select no type pair".to_string(),
            )
            .into());
        }
        Ok(count)
    }

    /// Resets the cutoff of every explicitly set pair to `cut_global`. This
    /// mirrors what re-issuing the global settings does to an already
    /// populated table.
    pub fn reset_cutoffs(&mut self, cut_global: f64) {
        for entry in self.entries.iter_mut().flatten() {
            entry.cut = cut_global;
        }
    }

    /// Whether the unordered pair `(i, j)` has been assigned.
    pub fn is_set(&self, i: usize, j: usize) -> bool {
        self.entries[self.index(i, j)].is_some()
    }

    /// Raw coefficients of `(i, j)`, if assigned. Used by the restart writer.
    pub fn raw(&self, i: usize, j: usize) -> Option<RawPair> {
        self.entries[self.index(i, j)]
    }

    /// Finalizes the table: verifies every pair is set, derives the noise
    /// strength from the fluctuation-dissipation relation, and produces the
    /// dense symmetric grid used during evaluation.
    ///
    /// # Arguments
    /// * `temperature`: thermostat target temperature.
    /// * `boltz`: Boltzmann constant in the engine's unit system.
    pub fn finalize(&self, temperature: f64, boltz: f64) -> Result<PairTable, DpdError> {
        let n = self.n_types;
        let mut grid = Vec::with_capacity(n * n);
        grid.resize(
            n * n,
            PairCoeffs {
                a0: 0.0,
                gamma: 0.0,
                sigma: 0.0,
                cut: 0.0,
            },
        );
        for i in 0..n {
            for j in i..n {
                let raw = self.entries[self.index(i, j)]
                    .ok_or(DpdErrorKind::UnsetPair { i, j })?;
                let coeffs = PairCoeffs {
                    a0: raw.a0,
                    gamma: raw.gamma,
                    sigma: (2.0 * boltz * temperature * raw.gamma).sqrt(),
                    cut: raw.cut,
                };
                grid[i * n + j] = coeffs;
                grid[j * n + i] = coeffs;
            }
        }
        Ok(PairTable { n_types: n, grid })
    }
}

/// Finalized, fully populated coefficient table. Read-only during force and
/// operator evaluation.
#[derive(Debug, Clone)]
pub struct PairTable {
    n_types: usize,
    grid: Vec<PairCoeffs>,
}

impl PairTable {
    pub fn n_types(&self) -> usize {
        self.n_types
    }

    /// Coefficients of the ordered type pair `(i, j)`. The grid is symmetric,
    /// so the order does not matter.
    ///
    /// # Panics
    /// Panics if either type is out of range; the caller is expected to have
    /// validated the particle set against `n_types` beforehand.
    #[inline]
    pub fn coeffs(&self, i: usize, j: usize) -> &PairCoeffs {
        &self.grid[i * self.n_types + j]
    }

    /// Evaluates a single pair at distance `r`: returns the force prefactor
    /// (force per unit separation vector, i.e. `a0 w / r` scaled by `factor`)
    /// and the shifted pair energy `0.5 a0 cut w^2`, both zero for a
    /// degenerate distance.
    pub fn single(&self, i: usize, j: usize, r: f64, factor: f64) -> (f64, f64) {
        let c = self.coeffs(i, j);
        if r < crate::assembly::DEGENERACY_EPSILON || r >= c.cut {
            return (0.0, 0.0);
        }
        let wd = 1.0 - r / c.cut;
        let fpair = c.a0 * wd * factor / r;
        let phi = 0.5 * c.a0 * c.cut * wd * wd;
        (fpair, factor * phi)
    }
}
