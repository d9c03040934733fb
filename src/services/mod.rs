//! Core services: capture, orchestration, job profiles and shutdown

pub mod capture;
pub mod fleet;
pub mod format;
pub mod pool;
pub mod profiles;
pub mod queries;
pub mod shutdown;
