//! examples of usage of RustedCollocation
/// collocation transcription, refinement and interpolation examples
pub mod collocation_examples;
