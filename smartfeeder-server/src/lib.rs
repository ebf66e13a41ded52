pub mod driver;
pub mod queue;
pub mod schedule;
pub mod server;
pub mod storage;
