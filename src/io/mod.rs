//! File-level I/O: filesystem capability, archives and the run summary

pub mod archive;
pub mod fs;
pub mod summary;
