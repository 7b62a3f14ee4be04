//! Plane-wave density-functional-theory solver.
//!
//! The crate implements a self-consistent-field (SCF) electronic-structure
//! solver in a truncated plane-wave basis: wave-function coefficients live in
//! reciprocal space inside an energy-cutoff sphere, FFTs move quantities
//! between reciprocal and real space, and the ground state is found by direct
//! minimization of the total-energy functional under orthonormality
//! constraints.
//!
//! The building blocks are:
//! - [`atoms`]: cell, sampling grid, reciprocal lattice and cutoff sphere,
//!   k-points and occupation numbers
//! - [`operators`]: the basis transform operators (`O`, `L`, `I`, `J`, ...)
//! - [`dft`]: orthogonalization, density construction, the Hamiltonian
//!   application and the constrained energy gradient
//! - [`energies`]: all energy contributions including the Ewald sum
//! - [`minimizer`]: steepest descent, line minimization and conjugate
//!   gradient stages
//! - [`scf`]: the calculation state machine exposing [`scf::Scf::run`]

pub mod atoms;
pub mod dft;
pub mod energies;
pub mod error;
pub mod gga;
pub mod gth;
pub mod minimizer;
pub mod operators;
pub mod scf;
pub mod xc;

pub use atoms::{Atoms, AtomsOptions, KPoints, Occupations};
pub use energies::Energy;
pub use error::{PwDftError, Result};
pub use scf::{Scf, ScfOptions};

use nalgebra::DMatrix;
use num_complex::Complex64;

/// Complex coefficient block for one (k-point, spin) pair: one column per
/// state, one row per active plane wave at that k-point.
pub type CoeffBlock = DMatrix<Complex64>;

/// Wave-function coefficients, always indexed by `[k-point][spin]`, even in
/// the single-k-point, spin-paired case.
pub type Wavefunction = Vec<Vec<CoeffBlock>>;
