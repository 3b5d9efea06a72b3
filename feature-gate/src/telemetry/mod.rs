pub mod emitter;
pub mod sink;
