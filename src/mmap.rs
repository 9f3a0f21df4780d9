//! Data-file and lock-file mapping.
//!
//! Grounded in a bare `libc::mmap` wrapper and the usual
//! open/ftruncate/mmap sequence an `Env::new` constructor runs, extended
//! with remapping and a dedicated synchronous fd for meta writes.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::cell::UnsafeCell;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

struct Region {
    addr: *mut u8,
    len: usize,
}

/// An open data file mapped into this process's address space, plus the
/// file handles needed for growth, meta pwrite, and PID liveness locking.
///
/// `region` is behind an `UnsafeCell` so that `grow` can be called through
/// a shared `&Mmap` (the environment hands out `&Env`, never `&mut Env`,
/// to readers and the writer alike). This mirrors the level of rigor an
/// `Env` built on `RefCell<Vec<*mut u8>>` map segments would need:
/// correctness rests on the writer mutex serializing the only caller that
/// ever grows the map, not on the type system proving it.
pub struct Mmap {
    data_file: File,
    /// Separate fd used only for meta-page pwrite, opened without
    /// `O_SYNC`/`O_DSYNC` tagging decisions baked in at the call site
    /// (durability mode decides whether to fsync after writing through
    /// it). Kept distinct from `data_file` so meta writes never contend
    /// with bulk page flush buffering.
    meta_file: File,
    lock_file: File,
    region: UnsafeCell<Region>,
}

// SAFETY: `addr` is a raw pointer into a memory map shared with the OS,
// not into process-local heap memory; synchronization across threads is
// the caller's responsibility, enforced by the writer mutex and reader
// table.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

pub struct Paths {
    pub data: PathBuf,
    pub lock: PathBuf,
}

impl Paths {
    /// When `no_subdir` is false (the default), `root` is a directory
    /// containing `data.mdb`-equivalent `data` and `lock` files. When
    /// true, `root` names the data file directly and the lock file is
    /// `root` with a `-lock` suffix.
    pub fn resolve(root: &Path, no_subdir: bool) -> Paths {
        if no_subdir {
            let mut lock = root.as_os_str().to_owned();
            lock.push("-lock");
            Paths { data: root.to_path_buf(), lock: PathBuf::from(lock) }
        } else {
            Paths { data: root.join("data"), lock: root.join("lock") }
        }
    }
}

impl Mmap {
    /// Opens (creating if absent) the data and lock files, grows the data
    /// file to `initial_len` bytes if it is smaller, and maps it
    /// read-write shared.
    pub fn open(paths: &Paths, initial_len: u64, read_only: bool) -> Result<Mmap> {
        if let Some(parent) = paths.data.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let data_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(&paths.data)?;
        let meta_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&paths.data)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(&paths.lock)?;

        if !read_only {
            lock_file.lock_exclusive().map_err(Error::Io)?;
            let current_len = data_file.metadata()?.len();
            if current_len < initial_len {
                data_file.set_len(initial_len)?;
            }
        }

        let len = data_file.metadata()?.len() as usize;
        let addr = Self::map(&data_file, len, read_only)?;

        Ok(Mmap { data_file, meta_file, lock_file, region: UnsafeCell::new(Region { addr, len }) })
    }

    fn map(file: &File, len: usize, read_only: bool) -> Result<*mut u8> {
        let prot = if read_only {
            libc::PROT_READ
        } else {
            libc::PROT_READ | libc::PROT_WRITE
        };
        unsafe {
            let ptr = libc::mmap(
                ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            Ok(ptr as *mut u8)
        }
    }

    pub fn len(&self) -> usize {
        unsafe { (*self.region.get()).len }
    }

    pub fn as_ptr(&self) -> *const u8 {
        unsafe { (*self.region.get()).addr }
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        unsafe { (*self.region.get()).addr }
    }

    /// Whole-map byte slice, re-derived from the current address/length on
    /// every call so a slice never outlives a concurrent `grow`. Callers
    /// index into this with page-size multiples; bounds are checked by
    /// slice indexing.
    pub fn as_slice(&self) -> &[u8] {
        let r = unsafe { &*self.region.get() };
        unsafe { std::slice::from_raw_parts(r.addr, r.len) }
    }

    /// # Safety
    /// Caller must ensure no other reference (shared or mutable) into the
    /// touched byte range is alive concurrently; the writer mutex held for
    /// the lifetime of a write transaction provides this for page ranges
    /// not aliased by any reader's snapshot-stable view, since readers
    /// only ever read pages reachable from an already-committed meta.
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        let r = &*self.region.get();
        std::slice::from_raw_parts_mut(r.addr, r.len)
    }

    /// Grows the backing file and remaps. Only the writer ever calls this,
    /// while holding the environment's writer mutex; any reader whose
    /// slice references the old mapping must not still be dereferencing it
    /// when this runs; see the module-level safety note on `Mmap`.
    pub fn grow(&self, new_len: u64) -> Result<()> {
        let cur_len = self.len();
        if new_len as usize <= cur_len {
            return Ok(());
        }
        self.data_file.set_len(new_len)?;
        let new_addr = unsafe {
            if libc::munmap(self.as_mut_ptr() as *mut libc::c_void, cur_len) != 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            Self::map(&self.data_file, new_len as usize, false)?
        };
        unsafe {
            *self.region.get() = Region { addr: new_addr, len: new_len as usize };
        }
        Ok(())
    }

    /// Writes `buf` at `offset` through the dedicated meta fd via pwrite,
    /// bypassing the mapped view so a short write cannot be observed
    /// through the map by a concurrent reader mid-write.
    pub fn pwrite_meta(&self, offset: u64, buf: &[u8]) -> Result<()> {
        pwrite_all(&self.meta_file, buf, offset)
    }

    pub fn fsync_data(&self) -> Result<()> {
        self.data_file.sync_data()?;
        Ok(())
    }

    pub fn fsync_meta(&self) -> Result<()> {
        self.meta_file.sync_all()?;
        Ok(())
    }

    /// Attempts a non-blocking exclusive lock at byte offset `pid` of the
    /// lock file, length 1. Success means no live process is holding that
    /// PID's liveness byte, i.e. the process has exited; the lock is
    /// immediately released again since this call only probes liveness.
    pub fn probe_pid_dead(&self, pid: u32) -> Result<bool> {
        match lock_pid_range(&self.lock_file, pid, true) {
            Ok(()) => {
                let _ = unlock_pid_range(&self.lock_file, pid);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Marks this process alive by holding an exclusive byte-range lock
    /// at offset `pid` for the lifetime of the returned guard.
    pub fn lock_pid(&self, pid: u32) -> Result<()> {
        lock_pid_range(&self.lock_file, pid, false).map_err(Error::Io)
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        let r = self.region.get_mut();
        unsafe {
            libc::munmap(r.addr as *mut libc::c_void, r.len);
        }
    }
}

fn pwrite_all(file: &File, buf: &[u8], offset: u64) -> Result<()> {
    let mut written = 0usize;
    while written < buf.len() {
        let n = unsafe {
            libc::pwrite(
                file.as_raw_fd(),
                buf[written..].as_ptr() as *const libc::c_void,
                buf.len() - written,
                (offset as i64) + written as i64,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Io(err));
        }
        written += n as usize;
    }
    Ok(())
}

fn lock_pid_range(file: &File, pid: u32, non_blocking: bool) -> io::Result<()> {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = libc::F_WRLCK as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = pid as libc::off_t;
    fl.l_len = 1;
    let cmd = if non_blocking { libc::F_SETLK } else { libc::F_SETLKW };
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), cmd, &fl) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        if non_blocking
            && (err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EACCES))
        {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        return Err(err);
    }
    Ok(())
}

fn unlock_pid_range(file: &File, pid: u32) -> io::Result<()> {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = libc::F_UNLCK as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = pid as libc::off_t;
    fl.l_len = 1;
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &fl) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_and_maps_file() {
        let dir = tempdir().unwrap();
        let paths = Paths::resolve(dir.path(), false);
        let m = Mmap::open(&paths, 1 << 20, false).unwrap();
        assert_eq!(m.len(), 1 << 20);
    }

    #[test]
    fn grow_extends_mapping() {
        let dir = tempdir().unwrap();
        let paths = Paths::resolve(dir.path(), false);
        let m = Mmap::open(&paths, 1 << 16, false).unwrap();
        m.grow(1 << 17).unwrap();
        assert_eq!(m.len(), 1 << 17);
    }

    #[test]
    fn pid_probe_detects_own_lock() {
        let dir = tempdir().unwrap();
        let paths = Paths::resolve(dir.path(), false);
        let m = Mmap::open(&paths, 1 << 16, false).unwrap();
        let pid = std::process::id();
        m.lock_pid(pid).unwrap();
        assert!(!m.probe_pid_dead(pid).unwrap());
    }
}
