pub mod hysteresis;
pub mod monitor;
pub mod sampler;
pub mod state;
