pub mod applier;
pub mod overclock;
pub mod sampler;
pub mod snapshot;
pub mod statistics;
