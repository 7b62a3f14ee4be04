//! Error types for the plane-wave DFT library.

use thiserror::Error;

/// The primary error type for all fallible operations in the `pwdft` library.
///
/// Configuration problems are reported at construction time, never deferred
/// into the minimization loop. Numerical singularities that indicate a
/// corrupted coefficient state are fatal. Non-convergence of the SCF cycle is
/// deliberately *not* an error: the run completes, returns the best energy
/// found, and leaves the converged flag unset for the caller to inspect.
#[derive(Error, Debug)]
pub enum PwDftError {
    /// An unknown exchange-correlation functional identifier was requested.
    #[error("unknown exchange-correlation functional \"{0}\"")]
    UnknownFunctional(String),

    /// An unsupported potential type was requested.
    #[error("unknown potential type \"{0}\"")]
    UnknownPotential(String),

    /// An unrecognized initial-guess method was requested.
    #[error("unknown initial guess method \"{0}\"")]
    UnknownGuess(String),

    /// An unrecognized minimizer name appeared in the stage list.
    #[error("no minimizer found for \"{0}\"")]
    UnknownMinimizer(String),

    /// A general configuration error, e.g. inconsistent occupations or an
    /// invalid cell description.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No pseudopotential parameters are available for a species.
    #[error("no GTH pseudopotential parameters available for species \"{0}\"")]
    UnknownSpecies(String),

    /// The Gram matrix of the coefficients is rank-deficient, so the
    /// orthogonalization `W (Wᴴ O W)^(-1/2)` is undefined. This indicates a
    /// corrupted or degenerate coefficient state and is not recoverable.
    #[error("rank-deficient Gram matrix in orthogonalization (smallest eigenvalue {0:.3e})")]
    SingularGram(f64),

    /// An optional collaborator (e.g. a dispersion-correction provider) was
    /// requested but is not installed.
    #[error("missing optional dependency: {0}")]
    MissingDependency(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PwDftError>;
