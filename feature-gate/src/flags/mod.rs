pub mod flag_models;
pub mod flag_source;
pub mod targeting;
