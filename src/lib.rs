//! Dissipative particle dynamics pair forces with a matrix-free implicit
//! friction solve.
//!
//! This crate implements the per-step numerical core of a DPD thermostat in
//! which the dissipative (friction) coupling is treated implicitly. Each pair
//! of particles within a cutoff interacts through three channels: a soft
//! conservative repulsion `a0 w(r)`, a drag proportional to the relative
//! velocity projected on the separation, and a random kick whose strength is
//! tied to the drag by the fluctuation-dissipation relation
//! `sigma = sqrt(2 kB T gamma)`. The weight function `w(r) = 1 - r/r_cut`
//! shapes all three channels to vanish smoothly at the cutoff.
//!
//! Treating the drag implicitly leads to the linear system
//!
//! ```text
//! (I - (dt/2) G) x = dt^2/2 * F + dt * v
//! ```
//!
//! where `G` couples every interacting pair. The system is never formed
//! explicitly: [`assembly::FrictionOperator`] exposes its matrix-vector
//! product over the neighbor structure, and [`solver::solve_implicit`]
//! projects the system onto a small Krylov subspace with the symmetric
//! Lanczos recurrence, inverts the resulting tridiagonal matrix densely, and
//! lifts the solution back. Around ten basis vectors capture the action of
//! the inverse because the operator is short-range and diagonally dominant.
//!
//! The surrounding simulation engine (spatial decomposition, neighbor lists,
//! time integration, persistence transport) is an external collaborator. Its
//! contracts enter this crate as traits: [`particles::NeighborProvider`] for
//! neighbor queries, [`noise::GaussianSource`] for random draws,
//! [`assembly::PairTally`] for energy/virial accounting, and
//! [`comm::Collective`] for the few scalar reductions and broadcasts issued
//! around initialization and summaries.
//!
//! ## Example
//!
//! A minimal two-particle step: assemble the explicit right-hand side, then
//! solve the implicit system through the matrix-free operator.
//!
//! ```rust
//! use dpd_implicit::{
//!     assemble_rhs, solve_implicit, FrictionOperator, Metrics, NeighborTable,
//!     PairTableBuilder, ParticleSet, Settings, SolverConfig, WhiteNoise,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Two particles of one type, closing in along x.
//! let particles = ParticleSet::new(
//!     vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
//!     vec![[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]],
//!     vec![0, 0],
//! )?;
//!
//! let settings = Settings::new(1.0, 1.0, 42)?;
//! let mut builder = PairTableBuilder::new(1);
//! builder.set(0, 0, 25.0, 4.5, settings.cut_global)?;
//! let table = builder.finalize(settings.temperature, 1.0)?;
//!
//! let neighbors = NeighborTable::build(&particles, settings.cut_global);
//! let mut noise = WhiteNoise::from_seed(settings.seed)?;
//! let mut metrics = Metrics::new();
//! let dt = 0.02;
//!
//! // Explicit forces and the velocity carry form the right-hand side ...
//! let rhs = assemble_rhs(&particles, &neighbors, &table, dt, &mut noise, None)?;
//!
//! // ... and the matrix-free solve yields the self-consistent displacement.
//! let operator = FrictionOperator::new(&particles, &neighbors, &table, dt)?;
//! let (dr, report) =
//!     solve_implicit(&operator, rhs.as_ref(), &SolverConfig::default(), &mut metrics)?;
//!
//! assert_eq!(dr.nrows(), particles.state_len());
//! assert!(report.iterations >= 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## State-vector convention
//!
//! Forces, velocities, and solver intermediates all share one dense layout:
//! a column of length `3 * N` over the locally owned particles, where entry
//! `3 * tag + c` is component `c` of the particle with state slot `tag`.
//! [`particles::ParticleSet`] enforces that tags are a dense 0-based
//! relabeling, and ghost images alias the slot of their owned image so that
//! pairwise accumulation conserves momentum exactly up to accumulation
//! order.

// Declare the modules that form the crate's API structure.
pub mod assembly;
pub mod comm;
pub mod error;
pub mod metrics;
pub mod noise;
pub mod operator;
pub mod params;
pub mod particles;
pub mod restart;
pub mod solver;

// Re-export the primary types for convenient access.
pub use assembly::{assemble_rhs, EnergyVirialTally, FrictionOperator, PairTally, DEGENERACY_EPSILON};
pub use comm::{Collective, SingleRank};
pub use error::DpdError;
pub use metrics::Metrics;
pub use noise::{GaussianSource, NoiseCorrelation, WhiteNoise};
pub use operator::LinearOperator;
pub use params::{MixRule, PairCoeffs, PairTable, PairTableBuilder, RawPair, Settings};
pub use particles::{NeighborProvider, NeighborTable, ParticleSet};
pub use solver::{solve_implicit, ConvergencePolicy, SolveReport, SolverConfig};
