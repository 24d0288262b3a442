//! Integration test suite for the pairwise assembly and the implicit solver.
//!
//! # Test Methodology
//!
//! The force assembly is validated against analytically known two-particle
//! configurations and against the structural properties the physics demands
//! (pairwise antisymmetry, momentum conservation, degenerate-pair safety).
//! The Krylov solver is validated against a ground truth obtained by
//! materializing the matrix-free operator column by column and solving the
//! dense system with an LU factorization, which is a standard validation
//! technique for iterative methods: the iterative solution must agree with
//! the direct one to within the subspace approximation error.
//!
//! All randomness is seeded, so every test is deterministic.

use dpd_implicit::{
    assemble_rhs, solve_implicit, ConvergencePolicy, EnergyVirialTally, FrictionOperator,
    GaussianSource, LinearOperator, Metrics, NeighborTable, PairTable, PairTableBuilder,
    ParticleSet, Settings, SolverConfig, WhiteNoise,
};
use faer::prelude::*;
use faer::Mat;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Tolerance for identities that must hold to machine precision (exact
/// linearity, pairwise cancellation of analytically known forces).
const EXACT_TOLERANCE: f64 = 1e-12;

/// Tolerance for the Krylov solution against the dense ground truth. The
/// subspace is truncated at ten vectors, so agreement is approximate, and for
/// the weakly coupled systems used here it is comfortably below this bound.
const APPROX_TOLERANCE: f64 = 1e-6;

/// Builds a one-type table with the given coefficients, finalized at the
/// given temperature with kB = 1.
fn uniform_table(a0: f64, gamma: f64, cut: f64, temperature: f64) -> PairTable {
    let mut builder = PairTableBuilder::new(1);
    builder.set(0, 0, a0, gamma, cut).unwrap();
    builder.finalize(temperature, 1.0).unwrap()
}

/// A reproducible random particle box of one type.
fn random_system(n: usize, box_side: f64, seed: u64, moving: bool) -> ParticleSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let positions = (0..n)
        .map(|_| {
            [
                rng.random_range(0.0..box_side),
                rng.random_range(0.0..box_side),
                rng.random_range(0.0..box_side),
            ]
        })
        .collect();
    let velocities = (0..n)
        .map(|_| {
            if moving {
                [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ]
            } else {
                [0.0; 3]
            }
        })
        .collect();
    ParticleSet::new(positions, velocities, vec![0; n]).unwrap()
}

/// A reproducible random state vector with entries in [-0.5, 0.5).
fn random_state(n: usize, seed: u64) -> Mat<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Mat::from_fn(n, 1, |_, _| rng.random::<f64>() - 0.5)
}

/// Materializes a matrix-free operator column by column.
fn dense_from_operator<O: LinearOperator<f64>>(operator: &O) -> Mat<f64> {
    let n = operator.nrows();
    let mut dense = Mat::zeros(n, n);
    for j in 0..n {
        let e_j = Mat::from_fn(n, 1, |i, _| if i == j { 1.0 } else { 0.0 });
        let col = operator.apply(e_j.as_ref());
        for i in 0..n {
            dense[(i, j)] = col[(i, 0)];
        }
    }
    dense
}

/// Sums every component of a state vector; for forces this is the net
/// momentum change and must vanish.
fn component_sum(state: &Mat<f64>) -> f64 {
    (0..state.nrows()).map(|i| state[(i, 0)]).sum()
}

#[test]
fn test_full_mode_forces_are_antisymmetric() {
    // With zero velocities the right-hand side is purely the scaled pairwise
    // force sum, random kicks included, and Newton's third law makes every
    // pair cancel in the total.
    let particles = random_system(24, 3.0, 7, false);
    let table = uniform_table(25.0, 4.5, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let mut noise = WhiteNoise::from_seed(99).unwrap();

    let rhs = assemble_rhs(&particles, &neighbors, &table, 0.05, &mut noise, None).unwrap();

    assert!(component_sum(&rhs).abs() < EXACT_TOLERANCE * particles.len() as f64);
}

#[test]
fn test_two_particle_conservative_force_scenario() {
    // a0 = 1, friction = 0, cutoff = 1, separation 0.5: the weight is 0.5,
    // the force on each endpoint is a0 * w = 0.5 along x with opposite signs,
    // and the shifted pair energy is 0.5 * a0 * cut * w^2 = 0.125. Zero
    // friction also forces sigma to zero, so the evaluation is noise-free.
    let particles = ParticleSet::new(
        vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
        vec![[0.0; 3]; 2],
        vec![0, 0],
    )
    .unwrap();
    let table = uniform_table(1.0, 0.0, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let mut noise = WhiteNoise::from_seed(1).unwrap();
    let dt = 0.1;
    let mut tally = EnergyVirialTally::new();

    let rhs = assemble_rhs(
        &particles,
        &neighbors,
        &table,
        dt,
        &mut noise,
        Some(&mut tally),
    )
    .unwrap();

    let scale = 0.5 * dt * dt;
    // Particle 0 sits at the origin, so its separation vector points in -x.
    assert!((rhs[(0, 0)] - scale * (-0.5)).abs() < EXACT_TOLERANCE);
    assert!((rhs[(3, 0)] - scale * 0.5).abs() < EXACT_TOLERANCE);
    for row in [1, 2, 4, 5] {
        assert_eq!(rhs[(row, 0)], 0.0);
    }

    assert!((tally.energy - 0.125).abs() < EXACT_TOLERANCE);
    // Virial xx component: del_x^2 * fpair with fpair = a0 * w / r = 1.
    assert!((tally.virial[0] - 0.25).abs() < EXACT_TOLERANCE);
}

#[test]
fn test_degenerate_pair_contributes_nothing() {
    // Coincident particles are legal in soft-potential systems. The pair is
    // inside the cutoff but its unit vector is undefined, so both modes must
    // skip it without failing.
    let particles = ParticleSet::new(
        vec![[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]],
        vec![[0.0; 3]; 2],
        vec![0, 0],
    )
    .unwrap();
    let table = uniform_table(25.0, 4.5, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let mut noise = WhiteNoise::from_seed(3).unwrap();

    let rhs = assemble_rhs(&particles, &neighbors, &table, 0.05, &mut noise, None).unwrap();
    assert_eq!(rhs, Mat::<f64>::zeros(6, 1));

    let operator = FrictionOperator::new(&particles, &neighbors, &table, 0.05).unwrap();
    let input = random_state(6, 11);
    let output = operator.apply(input.as_ref());
    // Only the identity term survives.
    assert!((&output - &input).norm_l2() < EXACT_TOLERANCE);
}

#[test]
fn test_step_mode_is_exactly_linear() {
    let particles = random_system(30, 3.0, 13, true);
    let table = uniform_table(25.0, 4.5, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let operator = FrictionOperator::new(&particles, &neighbors, &table, 0.1).unwrap();

    let n = particles.state_len();
    let u = random_state(n, 17);
    let v = random_state(n, 19);
    let (c1, c2) = (0.7, -1.3);

    let combined = Mat::from_fn(n, 1, |i, _| c1 * u[(i, 0)] + c2 * v[(i, 0)]);
    let lhs = operator.apply(combined.as_ref());

    let image_u = operator.apply(u.as_ref());
    let image_v = operator.apply(v.as_ref());
    let rhs = Mat::from_fn(n, 1, |i, _| c1 * image_u[(i, 0)] + c2 * image_v[(i, 0)]);

    assert!((&lhs - &rhs).norm_l2() < EXACT_TOLERANCE * n as f64);
}

#[test]
fn test_step_mode_identity_behavior() {
    let particles = random_system(20, 2.5, 23, true);
    let table = uniform_table(25.0, 4.5, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let operator = FrictionOperator::new(&particles, &neighbors, &table, 0.1).unwrap();
    let n = particles.state_len();

    // A linear operator maps zero to zero.
    let zero = Mat::<f64>::zeros(n, 1);
    assert_eq!(operator.apply(zero.as_ref()), zero);

    // On a canonical basis vector the diagonal entry is the identity plus a
    // non-negative drag feedback.
    for slot in [0, 7, n - 1] {
        let e = Mat::from_fn(n, 1, |i, _| if i == slot { 1.0 } else { 0.0 });
        let out = operator.apply(e.as_ref());
        assert!(out[(slot, 0)] >= 1.0 - EXACT_TOLERANCE);
    }
}

#[test]
fn test_step_mode_ignores_particle_velocities() {
    // The operator must read relative velocities from its input vector, never
    // from the particle state: two sets differing only in velocities must
    // produce bitwise identical applications.
    let still = random_system(20, 2.5, 29, false);
    let moving = random_system(20, 2.5, 29, true);
    let table = uniform_table(25.0, 4.5, 1.0, 1.0);
    let neighbors = NeighborTable::build(&still, 1.0);

    let op_still = FrictionOperator::new(&still, &neighbors, &table, 0.1).unwrap();
    let op_moving = FrictionOperator::new(&moving, &neighbors, &table, 0.1).unwrap();

    let input = random_state(still.state_len(), 31);
    assert_eq!(
        op_still.apply(input.as_ref()),
        op_moving.apply(input.as_ref())
    );
}

#[test]
fn test_step_mode_conserves_momentum() {
    // The drag feedback is pairwise antisymmetric, so applying the operator
    // changes no component sum: sum(A u) == sum(u).
    let particles = random_system(25, 2.5, 37, false);
    let table = uniform_table(25.0, 4.5, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let operator = FrictionOperator::new(&particles, &neighbors, &table, 0.1).unwrap();

    let u = random_state(particles.state_len(), 41);
    let out = operator.apply(u.as_ref());
    assert!((component_sum(&out) - component_sum(&u)).abs() < EXACT_TOLERANCE * u.nrows() as f64);
}

#[test]
fn test_implicit_solve_matches_dense_ground_truth() {
    let particles = random_system(10, 2.0, 43, true);
    let table = uniform_table(25.0, 2.0, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let dt = 0.01;
    let operator = FrictionOperator::new(&particles, &neighbors, &table, dt).unwrap();

    let mut noise = WhiteNoise::from_seed(47).unwrap();
    let b = assemble_rhs(&particles, &neighbors, &table, dt, &mut noise, None).unwrap();

    let dense = dense_from_operator(&operator);
    let x_true = dense.as_ref().partial_piv_lu().solve(&b);

    let mut metrics = Metrics::new();
    let (x_k, report) =
        solve_implicit(&operator, b.as_ref(), &SolverConfig::default(), &mut metrics).unwrap();

    let rel_err = (&x_k - &x_true).norm_l2() / x_true.norm_l2();
    assert!(
        rel_err < APPROX_TOLERANCE,
        "Krylov solution error too high: {rel_err}"
    );
    // A weakly coupled operator converges well inside the default budget.
    assert!(report.converged_at.is_some());
    assert_eq!(report.iterations, 10);
    assert_eq!(metrics.solves, 1);
    assert!(metrics.applies >= report.iterations as u64);
}

#[test]
fn test_more_iterations_do_not_degrade_solution() {
    // Strong coupling, so the subspace truncation error is visible: the
    // ten-step solution must be at least as accurate as the four-step one.
    let particles = random_system(12, 2.0, 53, true);
    let table = uniform_table(25.0, 4.5, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let dt = 0.1;
    let operator = FrictionOperator::new(&particles, &neighbors, &table, dt).unwrap();

    let b = random_state(particles.state_len(), 59);
    let dense = dense_from_operator(&operator);
    let x_true = dense.as_ref().partial_piv_lu().solve(&b);

    let mut metrics = Metrics::new();
    let mut error_at = |k: usize| {
        let config = SolverConfig {
            max_iterations: k,
            ..SolverConfig::default()
        };
        let (x_k, _) = solve_implicit(&operator, b.as_ref(), &config, &mut metrics).unwrap();
        (&x_k - &x_true).norm_l2()
    };

    let err_short = error_at(4);
    let err_long = error_at(10);
    assert!(err_long <= err_short * (1.0 + 1e-9));
}

#[test]
fn test_early_stop_agrees_with_fixed_budget() {
    let particles = random_system(10, 2.0, 61, true);
    let table = uniform_table(25.0, 2.0, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);
    let dt = 0.01;
    let operator = FrictionOperator::new(&particles, &neighbors, &table, dt).unwrap();
    let b = random_state(particles.state_len(), 67);

    let mut metrics = Metrics::new();
    let (x_fixed, report_fixed) =
        solve_implicit(&operator, b.as_ref(), &SolverConfig::default(), &mut metrics).unwrap();
    let early_config = SolverConfig {
        policy: ConvergencePolicy::EarlyStop,
        ..SolverConfig::default()
    };
    let (x_early, report_early) =
        solve_implicit(&operator, b.as_ref(), &early_config, &mut metrics).unwrap();

    // Early stop saves iterations and only perturbs the result below the
    // convergence tolerance scale.
    assert!(report_early.iterations <= report_fixed.iterations);
    assert!(report_early.converged_at.is_some());
    assert!((&x_early - &x_fixed).norm_l2() < 1e-3);
}

#[test]
fn test_noise_stream_is_consumed_per_pair() {
    // Two identical evaluations against one live stream must differ (fresh
    // Gaussians per pair per call), while identically re-seeded streams must
    // reproduce the same right-hand side exactly.
    let particles = random_system(16, 2.0, 71, false);
    let table = uniform_table(25.0, 4.5, 1.0, 1.0);
    let neighbors = NeighborTable::build(&particles, 1.0);

    let mut live = WhiteNoise::from_seed(73).unwrap();
    let first = assemble_rhs(&particles, &neighbors, &table, 0.05, &mut live, None).unwrap();
    let second = assemble_rhs(&particles, &neighbors, &table, 0.05, &mut live, None).unwrap();
    assert!((&first - &second).norm_l2() > 0.0);

    let mut replay = WhiteNoise::from_seed(73).unwrap();
    let replayed = assemble_rhs(&particles, &neighbors, &table, 0.05, &mut replay, None).unwrap();
    assert_eq!(first, replayed);
}

#[test]
fn test_restart_round_trip() {
    use dpd_implicit::restart::{read_restart, write_restart};

    let mut settings = Settings::new(1.25, 1.75, 4621).unwrap();
    settings.mix = dpd_implicit::MixRule::Arithmetic;

    // Two types, one pair set with awkward values, one left unset, one more
    // set so both flag states appear mid-stream.
    let mut builder = PairTableBuilder::new(2);
    builder.set(0, 0, 25.132741228718345, 4.5e-3, 1.0625).unwrap();
    builder.set(1, 1, -3.75, 0.0, 0.9375).unwrap();

    let mut buf = Vec::new();
    write_restart(&settings, &builder, &mut buf).unwrap();
    // settings (24) + set record (28) + bare flag (4) + set record (28).
    assert_eq!(buf.len(), 84);

    let (settings_back, builder_back) = read_restart(2, &mut buf.as_slice()).unwrap();
    assert_eq!(settings_back, settings);

    assert!(builder_back.is_set(0, 0));
    assert!(!builder_back.is_set(0, 1));
    assert!(builder_back.is_set(1, 1));

    let orig = builder.raw(0, 0).unwrap();
    let back = builder_back.raw(0, 0).unwrap();
    assert_eq!(orig.a0.to_bits(), back.a0.to_bits());
    assert_eq!(orig.gamma.to_bits(), back.gamma.to_bits());
    assert_eq!(orig.cut.to_bits(), back.cut.to_bits());
}

#[test]
fn test_unset_pair_is_a_fatal_configuration_error() {
    let mut builder = PairTableBuilder::new(3);
    builder.set_block(0..=2, 0..=2, 25.0, 4.5, 1.0).unwrap();
    let complete = builder.finalize(1.0, 1.0);
    assert!(complete.is_ok());

    let mut partial = PairTableBuilder::new(3);
    partial.set(0, 0, 25.0, 4.5, 1.0).unwrap();
    let err = partial.finalize(1.0, 1.0).unwrap_err();
    assert!(err.to_string().contains("are not set"));
}

#[test]
fn test_gaussian_source_moments() {
    // Coarse sanity check on the draw stream: mean near zero, variance near
    // one. Bounds are loose enough to be deterministic for the fixed seed.
    let mut noise = WhiteNoise::from_seed(79).unwrap();
    let n = 20_000;
    let draws: Vec<f64> = (0..n).map(|_| noise.next_gaussian()).collect();
    let mean = draws.iter().sum::<f64>() / n as f64;
    let var = draws.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    assert!(mean.abs() < 0.05);
    assert!((var - 1.0).abs() < 0.05);
}
