/// error type shared by the interpolation and transcription modules
pub mod transcription_errors;
/// barycentric Lagrange, Hermite and Romberg utilities
pub mod Interpolation;
/// implicit Runge-Kutta collocation transcription with mesh refinement
pub mod ImplicitRK;
