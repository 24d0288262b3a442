//! Pairwise force and operator assembly.
//!
//! Both entry points of this module walk the same neighbor structure and
//! share the same pairwise geometry; they differ in what they accumulate.
//!
//! **Full mode** ([`assemble_rhs`]) evaluates the explicit part of the step:
//! for every in-cutoff pair the conservative force `a0 w` and the random
//! force `sigma w xi / sqrt(dt)` along the unit separation vector, summed
//! sign-symmetrically into both endpoints. The per-particle totals are then
//! folded into the right-hand side of the implicit system with the
//! semi-implicit scaling `dt^2/2 * f + dt * v`.
//!
//! **Step mode** ([`FrictionOperator`]) is the matrix-free product with
//! `I - (dt/2) G`, where `G` is the pairwise dissipative operator. Relative
//! velocities are read from the *input* state vector, not from the particle
//! set, which is exactly what makes the solve self-consistent. Step mode
//! draws no randomness and does no tallying; it is a deterministic, linear
//! function of its input, and the Krylov solver's correctness depends on
//! that.
//!
//! A pair whose distance is numerically degenerate (below
//! [`DEGENERACY_EPSILON`]) contributes nothing in either mode. Overlapping
//! particles are legitimate in soft-potential systems and the weight function
//! is finite there; only the unit vector is undefined, so the pair is
//! skipped rather than treated as an error.

use faer::{Mat, MatRef};

use crate::error::{DpdError, DpdErrorKind};
use crate::noise::GaussianSource;
use crate::operator::LinearOperator;
use crate::params::PairTable;
use crate::particles::{NeighborProvider, ParticleSet};

/// Pair distances below this threshold are treated as degenerate and skipped.
/// Distances can be exactly zero in soft-repulsion systems.
pub const DEGENERACY_EPSILON: f64 = 1.0e-10;

/// Sink for per-pair energy/virial accounting, owned by the external engine's
/// tallying service. Invoked once per in-cutoff pair with the shifted pair
/// energy, the force prefactor (force per unit separation vector), and the
/// separation itself.
pub trait PairTally {
    fn record_pair(&mut self, i: usize, j: usize, energy: f64, fpair: f64, del: [f64; 3]);
}

/// A basic accumulating tally: total pair energy and the six independent
/// virial components in xx, yy, zz, xy, xz, yz order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyVirialTally {
    pub energy: f64,
    pub virial: [f64; 6],
}

impl EnergyVirialTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl PairTally for EnergyVirialTally {
    fn record_pair(&mut self, _i: usize, _j: usize, energy: f64, fpair: f64, del: [f64; 3]) {
        self.energy += energy;
        self.virial[0] += del[0] * del[0] * fpair;
        self.virial[1] += del[1] * del[1] * fpair;
        self.virial[2] += del[2] * del[2] * fpair;
        self.virial[3] += del[0] * del[1] * fpair;
        self.virial[4] += del[0] * del[2] * fpair;
        self.virial[5] += del[1] * del[2] * fpair;
    }
}

fn check_types(particles: &ParticleSet, table: &PairTable) -> Result<(), DpdError> {
    if let Some(t) = particles.max_type() {
        if t >= table.n_types() {
            return Err(DpdErrorKind::InvalidParameter(format!(
                "particle type {t} is out of range for a table over {} types",
                table.n_types()
            ))
            .into());
        }
    }
    Ok(())
}

/// Assembles the right-hand side of the implicit velocity system.
///
/// For every owned particle and neighbor within the per-pair cutoff, the
/// conservative and random pairwise forces are accumulated into both
/// endpoints with opposite sign, scaled by the neighbor's exclusion factor.
/// After the neighbor sweep, each owned particle's force total `f` and
/// current velocity `v` are combined into the state-vector entry
/// `dt^2/2 * f + dt * v`.
///
/// One Gaussian draw is consumed per in-cutoff pair per call, so two calls
/// with the same inputs but a live noise source produce different results;
/// the tally sink, when given, receives every in-cutoff pair exactly once.
///
/// # Errors
/// Fails if `dt` is not positive or if a particle type is out of range for
/// the table. A degenerate pair distance is not an error; the pair is
/// skipped.
pub fn assemble_rhs<N, G>(
    particles: &ParticleSet,
    neighbors: &N,
    table: &PairTable,
    dt: f64,
    noise: &mut G,
    mut tally: Option<&mut dyn PairTally>,
) -> Result<Mat<f64>, DpdError>
where
    N: NeighborProvider,
    G: GaussianSource + ?Sized,
{
    if !(dt > 0.0) {
        return Err(
            DpdErrorKind::InvalidParameter(format!("time step must be positive, got {dt}")).into(),
        );
    }
    check_types(particles, table)?;

    let n_state = particles.state_len();
    let mut f = vec![0.0_f64; n_state];
    let dtinvsqrt = 1.0 / dt.sqrt();

    for i in 0..particles.n_owned() {
        let xi = particles.position(i);
        let itype = particles.type_of(i);
        let islot = 3 * particles.tag(i);

        for &(j, factor) in neighbors.neighbors(i) {
            let xj = particles.position(j);
            let del = [xi[0] - xj[0], xi[1] - xj[1], xi[2] - xj[2]];
            let rsq = del[0] * del[0] + del[1] * del[1] + del[2] * del[2];
            let coeffs = table.coeffs(itype, particles.type_of(j));
            if rsq >= coeffs.cut * coeffs.cut {
                continue;
            }
            let r = rsq.sqrt();
            if r < DEGENERACY_EPSILON {
                continue;
            }
            let rinv = 1.0 / r;
            let wd = 1.0 - r / coeffs.cut;
            let randnum = noise.next_gaussian();

            // conservative force = a0 * wd
            // random force = sigma * wd * rnd / sqrt(dt)
            let mut fpair = coeffs.a0 * wd;
            fpair += coeffs.sigma * wd * randnum * dtinvsqrt;
            fpair *= factor * rinv;

            let jslot = 3 * particles.tag(j);
            for c in 0..3 {
                f[islot + c] += del[c] * fpair;
                f[jslot + c] -= del[c] * fpair;
            }

            if let Some(sink) = tally.as_deref_mut() {
                // Conservative energy shifted to zero at the cutoff.
                let evdwl = 0.5 * coeffs.a0 * coeffs.cut * wd * wd * factor;
                sink.record_pair(i, j, evdwl, fpair, del);
            }
        }
    }

    // Fold forces and the explicit velocity carry into the state vector.
    let half_dt_sq = 0.5 * dt * dt;
    for i in 0..particles.n_owned() {
        let slot = 3 * particles.tag(i);
        let v = particles.velocity(i);
        for c in 0..3 {
            f[slot + c] = f[slot + c] * half_dt_sq + dt * v[c];
        }
    }

    Ok(Mat::from_fn(n_state, 1, |r, _| f[r]))
}

/// The matrix-free implicit friction operator `I - (dt/2) G`.
///
/// `G` is the pairwise dissipative operator: for each in-cutoff pair it
/// projects the relative velocity onto the unit separation vector and feeds
/// back `-gamma w^2` of it, sign-symmetrically, into both endpoints. The
/// operator is symmetric under the state-vector inner product, which is what
/// permits the three-term Lanczos recurrence in the solver.
///
/// Construction validates the particle types against the table so that
/// [`LinearOperator::apply`] itself has no failure path.
#[derive(Debug)]
pub struct FrictionOperator<'a, N: NeighborProvider> {
    particles: &'a ParticleSet,
    neighbors: &'a N,
    table: &'a PairTable,
    dt: f64,
}

impl<'a, N: NeighborProvider> FrictionOperator<'a, N> {
    pub fn new(
        particles: &'a ParticleSet,
        neighbors: &'a N,
        table: &'a PairTable,
        dt: f64,
    ) -> Result<Self, DpdError> {
        if !(dt > 0.0) {
            return Err(DpdErrorKind::InvalidParameter(format!(
                "time step must be positive, got {dt}"
            ))
            .into());
        }
        check_types(particles, table)?;
        Ok(Self {
            particles,
            neighbors,
            table,
            dt,
        })
    }
}

impl<'a, N: NeighborProvider> LinearOperator<f64> for FrictionOperator<'a, N> {
    fn nrows(&self) -> usize {
        self.particles.state_len()
    }

    fn ncols(&self) -> usize {
        self.particles.state_len()
    }

    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        let n_state = self.particles.state_len();
        assert_eq!(
            rhs.nrows(),
            n_state,
            "Dimension mismatch: operator rows ({}) do not match vector rows ({}).",
            n_state,
            rhs.nrows(),
        );

        let mut out = vec![0.0_f64; n_state];
        let pre = -self.dt / 2.0;

        for i in 0..self.particles.n_owned() {
            let xi = self.particles.position(i);
            let itype = self.particles.type_of(i);
            let islot = 3 * self.particles.tag(i);

            // Identity contribution, once per owned particle.
            for c in 0..3 {
                out[islot + c] += rhs[(islot + c, 0)];
            }

            for &(j, factor) in self.neighbors.neighbors(i) {
                let xj = self.particles.position(j);
                let del = [xi[0] - xj[0], xi[1] - xj[1], xi[2] - xj[2]];
                let rsq = del[0] * del[0] + del[1] * del[1] + del[2] * del[2];
                let coeffs = self.table.coeffs(itype, self.particles.type_of(j));
                if rsq >= coeffs.cut * coeffs.cut {
                    continue;
                }
                let r = rsq.sqrt();
                if r < DEGENERACY_EPSILON {
                    continue;
                }
                let rinv = 1.0 / r;
                let wd = 1.0 - r / coeffs.cut;

                // Relative velocity comes from the input vector, so the drag
                // is evaluated against the trial field being solved for.
                let jslot = 3 * self.particles.tag(j);
                let delv = [
                    rhs[(islot, 0)] - rhs[(jslot, 0)],
                    rhs[(islot + 1, 0)] - rhs[(jslot + 1, 0)],
                    rhs[(islot + 2, 0)] - rhs[(jslot + 2, 0)],
                ];
                let dot = del[0] * delv[0] + del[1] * delv[1] + del[2] * delv[2];

                // drag force = -gamma * wd^2 * (del . delv) / r
                let mut fpair = -coeffs.gamma * wd * wd * dot * rinv;
                fpair *= pre * factor * rinv;

                for c in 0..3 {
                    out[islot + c] += del[c] * fpair;
                    out[jslot + c] -= del[c] * fpair;
                }
            }
        }

        Mat::from_fn(n_state, 1, |r, _| out[r])
    }
}
