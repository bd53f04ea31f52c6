use crate::http::HttpCode;
use log::debug;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

/// Permission bit for "readable by others"
const S_IROTH: u32 = 0o004;

/// A read-only, private memory mapping of a whole file.
///
/// Response bodies are sent straight from this mapping; the bytes are never
/// copied into the connection's write buffer.
pub struct MappedFile {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is PROT_READ and never aliased mutably.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Map the first `len` bytes of `file`.
    ///
    /// A zero-length file yields an empty view without calling mmap, which
    /// rejects zero-sized mappings.
    pub fn map(file: &File, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len: 0,
            });
        }

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    /// Get the mapped bytes
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
            }
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile").field("len", &self.len).finish()
    }
}

/// The directory requests are resolved against
#[derive(Debug, Clone)]
pub struct DocumentRoot {
    root: PathBuf,
    max_path_len: usize,
}

impl DocumentRoot {
    /// `max_path_len` bounds the joined filesystem path (root + target)
    pub fn new<P: Into<PathBuf>>(root: P, max_path_len: usize) -> Self {
        Self {
            root: root.into(),
            max_path_len,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Concatenate the root with a request target. The target always starts
    /// with `/`, so plain string concatenation keeps it under the root.
    pub fn join(&self, target: &str) -> Option<PathBuf> {
        let mut path = OsString::with_capacity(self.max_path_len);
        path.push(self.root.as_os_str());
        path.push(target);
        if path.len() >= self.max_path_len {
            return None;
        }
        Some(PathBuf::from(path))
    }

    /// Resolve a request target to a mapped file.
    ///
    /// Failures are reported as the `HttpCode` to answer with: missing
    /// files (and targets that try to climb out of the root) are
    /// `NoResource`, files not readable by others are `Forbidden`,
    /// directories and over-long paths are `BadRequest`.
    pub fn resolve(&self, target: &str) -> Result<MappedFile, HttpCode> {
        if target.split('/').any(|segment| segment == "..") {
            return Err(HttpCode::NoResource);
        }

        let path = self.join(target).ok_or(HttpCode::BadRequest)?;

        let metadata = fs::metadata(&path).map_err(|_| HttpCode::NoResource)?;
        if metadata.permissions().mode() & S_IROTH == 0 {
            return Err(HttpCode::Forbidden);
        }
        if metadata.is_dir() {
            return Err(HttpCode::BadRequest);
        }
        if !metadata.is_file() {
            return Err(HttpCode::Forbidden);
        }

        let file = File::open(&path).map_err(|e| {
            debug!("open {} failed: {}", path.display(), e);
            HttpCode::InternalError
        })?;
        let len = usize::try_from(metadata.len()).map_err(|_| HttpCode::InternalError)?;
        MappedFile::map(&file, len).map_err(|e| {
            debug!("mmap {} failed: {}", path.display(), e);
            HttpCode::InternalError
        })
    }
}
