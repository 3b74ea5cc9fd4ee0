pub mod rig;

pub use rig::{MockCrm, TestRig, seed_registry};
