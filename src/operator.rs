//! This module defines the core abstraction for linear operators.
//!
//! The Krylov projection in [`crate::solver`] never needs the individual
//! elements of the implicit friction matrix. Its only fundamental operation is
//! the matrix-vector product, and the friction matrix couples every in-cutoff
//! particle pair, so materializing it would cost O(N^2) storage for something
//! the neighbor structure lets us apply in O(N). The solver is therefore
//! written against a "matrix-free" contract:
//!
//! 1.  **Generality**: the same solve works for the pairwise friction operator
//!     of [`crate::assembly::FrictionOperator`], for an explicit dense matrix,
//!     or for a future correlated-noise-aware operator, without touching the
//!     solver code.
//! 2.  **Testability**: the solver can be validated against small dense
//!     matrices whose inverse action is known, and then deployed on the
//!     neighbor-list operator unchanged.
//!
//! The central piece of this module is the [`LinearOperator`] trait, which
//! formalizes this contract, together with implementations for `faer`'s dense
//! matrix types used by the test suite.

use faer::{traits::ComplexField, Mat, MatRef};

/// Represents a linear operator that can be applied to a state vector.
///
/// Implementations must be deterministic and exactly linear in their input:
/// the Lanczos recurrence in [`crate::solver::solve_implicit`] relies on
/// `apply` being a pure function of `rhs`, with no hidden dependence on
/// simulation state that changes between calls within one solve.
pub trait LinearOperator<T: ComplexField> {
    /// Returns the number of rows of the operator.
    fn nrows(&self) -> usize;

    /// Returns the number of columns of the operator.
    fn ncols(&self) -> usize;

    /// Applies the linear operator to a single-column state vector `rhs`,
    /// returning an owned column with the result of `A * rhs`.
    ///
    /// # Panics
    ///
    /// Implementations are expected to panic if the inner dimension of the
    /// operator does not match the number of rows of `rhs`.
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T>;
}

/// Implementation for `faer`'s immutable dense matrix view. This is the
/// concrete implementation the solver tests run against, with the dense
/// matrix assembled column by column from the matrix-free operator.
impl<'a, T: ComplexField> LinearOperator<T> for MatRef<'a, T> {
    #[inline]
    fn nrows(&self) -> usize {
        (*self).nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        (*self).ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_eq!(
            (*self).ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            (*self).ncols(),
            rhs.nrows(),
        );

        // Defer to faer's optimized matrix multiplication routine.
        self * rhs
    }
}

/// Implementation for `faer`'s owned dense matrix, delegating to the `MatRef`
/// implementation via a view.
impl<T: ComplexField> LinearOperator<T> for Mat<T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.as_ref().apply(rhs)
    }
}
