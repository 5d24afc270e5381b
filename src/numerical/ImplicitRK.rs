//! Implicit Runge-Kutta (Lobatto IIIA) collocation transcription of optimal control phases
/// Butcher tableaux and their sparse dependency patterns
pub mod butcher_tableau;
/// global point numbering: (mesh, stage) <-> point index
pub mod mesh_layout;
/// decision vector and dynamics evaluator seen by the driver
pub mod IRK_interfaces;
/// transcription settings and task-file loading
pub mod IRK_config;
/// defect and cost assembly, interpolation inside a mesh step
pub mod IRK_driver;
/// a-posteriori error estimation and mesh refinement
pub mod IRK_refinement;

mod IRK_refinement_tests;
