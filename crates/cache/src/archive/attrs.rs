//! Permission bits and modification times of files on disk

use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;

/// Reads and writes the attributes the archive preserves
///
/// The packer only ever calls the getters and the unpacker only the setters,
/// so a test double can observe exactly what a restore applies.
pub trait FileAttributes {
    /// POSIX-style permission bits (`0o7777` mask) of `path`
    fn permissions(&self, path: &Path) -> io::Result<u32>;

    /// Apply POSIX-style permission bits to `path`
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Last modification time of `path`
    fn modified(&self, path: &Path) -> io::Result<FileTime>;

    /// Set the last modification time of `path`
    fn set_modified(&self, path: &Path, mtime: FileTime) -> io::Result<()>;
}

/// Attributes as exposed by the host platform
///
/// On Unix this is the full mode. Elsewhere only the read-only flag exists;
/// it maps to `0o444`/`0o644` for files and `0o755` for directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeAttributes;

impl FileAttributes for NativeAttributes {
    #[cfg(unix)]
    fn permissions(&self, path: &Path) -> io::Result<u32> {
        use std::os::unix::fs::PermissionsExt;
        Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
    }

    #[cfg(not(unix))]
    fn permissions(&self, path: &Path) -> io::Result<u32> {
        let metadata = fs::metadata(path)?;
        Ok(if metadata.is_dir() {
            0o755
        } else if metadata.permissions().readonly() {
            0o444
        } else {
            0o644
        })
    }

    #[cfg(unix)]
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
    }

    #[cfg(not(unix))]
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(mode & 0o200 == 0);
        fs::set_permissions(path, perms)
    }

    fn modified(&self, path: &Path) -> io::Result<FileTime> {
        Ok(FileTime::from_last_modification_time(&fs::metadata(path)?))
    }

    fn set_modified(&self, path: &Path, mtime: FileTime) -> io::Result<()> {
        filetime::set_file_mtime(path, mtime)
    }
}
