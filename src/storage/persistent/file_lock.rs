//! Advisory file locking for the feedback log.
//!
//! Writers take an exclusive lock and readers a shared one on a sidecar
//! `<log>.lock` file, so separate processes pointed at the same log serialize
//! their read-modify-write cycles.
//!
//! # Safety
//! - Lock is released when FileLock is dropped
//! - Lock file is created if it doesn't exist
//! - Blocking acquisition by default; `try_exclusive` fails fast

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

/// Lock flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers.
    Shared,
    /// One writer.
    Exclusive,
}

/// Advisory lock on a sidecar file.
///
/// The lock is held for the lifetime of this struct and automatically
/// released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    /// Sidecar lock path for a log file.
    #[must_use]
    pub fn lock_path_for(log_path: &Path) -> PathBuf {
        let mut name = log_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        log_path.with_file_name(name)
    }

    /// Blocks until an exclusive lock on `lock_path` is held.
    ///
    /// # Errors
    /// - `ErrorKind::PermissionDenied` if we don't have write access
    pub fn exclusive(lock_path: &Path) -> IoResult<Self> {
        Self::acquire(lock_path, LockMode::Exclusive, true)
    }

    /// Blocks until a shared lock on `lock_path` is held.
    ///
    /// # Errors
    /// - `ErrorKind::PermissionDenied` if we don't have write access
    pub fn shared(lock_path: &Path) -> IoResult<Self> {
        Self::acquire(lock_path, LockMode::Shared, true)
    }

    /// Attempts an exclusive lock without waiting.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another holder has the lock
    pub fn try_exclusive(lock_path: &Path) -> IoResult<Self> {
        Self::acquire(lock_path, LockMode::Exclusive, false)
    }

    fn acquire(lock_path: &Path, mode: LockMode, wait: bool) -> IoResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        Self::lock(&file, mode, wait)?;

        Ok(Self {
            _file: file,
            path: lock_path.to_path_buf(),
            mode,
        })
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the lock flavour held.
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    #[cfg(unix)]
    fn lock(file: &File, mode: LockMode, wait: bool) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        let mut op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        if !wait {
            op |= libc::LOCK_NB;
        }

        let fd = file.as_raw_fd();
        loop {
            let result = unsafe { libc::flock(fd, op) };
            if result == 0 {
                return Ok(());
            }
            let errno = std::io::Error::last_os_error();
            match errno.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EWOULDBLOCK) => {
                    return Err(IoError::new(
                        ErrorKind::WouldBlock,
                        "feedback log is locked by another writer",
                    ));
                }
                _ => return Err(errno),
            }
        }
    }

    #[cfg(windows)]
    fn lock(file: &File, mode: LockMode, wait: bool) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let mut flags = 0;
        if mode == LockMode::Exclusive {
            flags |= LOCKFILE_EXCLUSIVE_LOCK;
        }
        if !wait {
            flags |= LOCKFILE_FAIL_IMMEDIATELY;
        }

        let handle = file.as_raw_handle() as HANDLE;
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
        };

        if result == 0 {
            let err = std::io::Error::last_os_error();
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("feedback log is locked by another writer: {err}"),
            ));
        }

        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn lock(_file: &File, _mode: LockMode, _wait: bool) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}
