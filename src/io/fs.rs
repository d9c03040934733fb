//! Filesystem capability used by the capture engine and profile downloads.
//!
//! Implemented by [`RealFileSystem`] for production and by in-memory fakes in
//! tests.

use std::io;
use std::path::Path;

/// Permission bits used for every file the collector writes.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

pub trait FileSystem: Send + Sync {
    /// Size of the file at `path` in bytes.
    fn stat(&self, path: &Path) -> io::Result<u64>;

    /// Create or truncate `path` with `mode` and write `bytes` to it.
    fn write_file(&self, path: &Path, bytes: &[u8], mode: u32) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    #[cfg(unix)]
    fn write_file(&self, path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
        use rustix::fs::{self as rfs, Mode, OFlags};
        use std::io::Write;

        let fd = rfs::open(
            path,
            OFlags::WRONLY | OFlags::CREATE | OFlags::TRUNC | OFlags::CLOEXEC,
            Mode::from_raw_mode(mode),
        )
        .map_err(io::Error::from)?;
        let mut file = std::fs::File::from(fd);
        file.write_all(bytes)?;
        file.sync_all()
    }

    #[cfg(not(unix))]
    fn write_file(&self, path: &Path, bytes: &[u8], _mode: u32) -> io::Result<()> {
        std::fs::write(path, bytes)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}
