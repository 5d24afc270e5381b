//! Interpolation and quadrature used by mesh refinement.
/// barycentric Lagrange interpolation with cached weights and query matrix
pub mod BaryLagrange;
/// Hermite interpolation from values and first derivatives
pub mod Hermite;
/// Romberg quadrature on a dyadic grid
pub mod Romberg;
