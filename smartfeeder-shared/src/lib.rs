pub mod domain;
pub mod schedule;
pub mod wire;
