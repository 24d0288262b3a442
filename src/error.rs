//! This module defines the custom error types for the library.
//!
//! All failure conditions of the force assembly and the implicit solver are
//! centralized into a single enum wrapped by [`DpdError`]. Every error here is
//! a terminal condition: a missing coefficient or a singular projected system
//! has no meaningful local recovery, so callers are expected to abort the run.
//!
//! Restart I/O has its own error type in [`crate::restart`], since its failure
//! modes (truncated streams, malformed blocks) belong to the persistence layer
//! rather than to the numerics.
use thiserror::Error;

/// Represents all possible errors that can occur during force assembly or an
/// implicit velocity solve.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct DpdError(#[from] DpdErrorKind);

/// Private enum containing the distinct kinds of errors.
/// This separation allows for a clean `Display` implementation via [`thiserror`]
/// while keeping the set of variants free to evolve without breaking the API.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum DpdErrorKind {
    /// A pair of particle types was used before its coefficients were assigned.
    /// Every type pair that can occur in a neighbor interaction must be set
    /// explicitly; there is no mixing fallback for this pair style.
    #[error("Pair coefficients for types ({i}, {j}) are not set.")]
    UnsetPair { i: usize, j: usize },

    /// An invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InvalidParameter(String),

    /// The dimensions of the friction operator and a state vector are
    /// incompatible.
    #[error(
        "Dimension mismatch: operator has {operator_rows} rows but state vector has {state_rows} rows."
    )]
    DimensionMismatch {
        operator_rows: usize,
        state_rows: usize,
    },

    /// The dense inversion of the projected tridiagonal system failed. For a
    /// well-posed friction operator with positive off-diagonal coefficients
    /// this cannot happen, so a singular projection indicates a corrupted
    /// state vector or parameter set.
    #[error("The {k}x{k} projected friction system is singular; the implicit solve cannot continue.")]
    SingularProjection { k: usize },
}

// Manually implement PartialEq for the public error type.
// We compare the inner `DpdErrorKind`.
impl PartialEq for DpdError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
