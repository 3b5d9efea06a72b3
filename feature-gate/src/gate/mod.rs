pub mod overrides;
pub mod resolver;
pub mod service;
