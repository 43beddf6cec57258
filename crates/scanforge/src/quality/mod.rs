pub mod sharpness;

pub use sharpness::{laplacian_variance, luma_bt601, GateDecision, SharpnessGate, DEFAULT_SHARPNESS_THRESHOLD};
