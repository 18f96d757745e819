//! Staging buffer for files created through the mount.
//!
//! A created file does not exist anywhere until its bytes are complete: the
//! import copies the whole content into the collection in one step and then
//! registers it. [`WriteBuffer`] holds the content in memory between
//! `create` and `release`:
//!
//! 1. On create: an empty, clean buffer is attached to the new entry
//! 2. On write: data is copied into the buffer at the given offset
//! 3. On release: a dirty buffer is imported, a clean one is dropped

use fspotfs_core::VirtualPath;
use std::io;

/// Largest file that can be staged in memory (4 GiB).
pub const MAX_STAGED_LEN: u64 = 4 << 30;

/// In-memory content of a file that has not been imported yet.
///
/// # Example
///
/// ```
/// use fspotfs_core::VirtualPath;
/// use fspotfs_mount::WriteBuffer;
///
/// let mut buf = WriteBuffer::new(VirtualPath::new("/Vacation/Beach/p1.jpg"));
/// assert!(!buf.is_dirty());
///
/// buf.write(0, b"Hello, World!").unwrap();
/// assert_eq!(buf.len(), 13);
/// assert!(buf.is_dirty());
/// assert_eq!(buf.read(0, 5), b"Hello");
/// ```
#[derive(Debug)]
pub struct WriteBuffer {
    content: Vec<u8>,
    /// Set by any write or size change.
    dirty: bool,
    /// Where the file was created, and where the import is requested.
    target: VirtualPath,
}

impl WriteBuffer {
    /// Create an empty buffer for a file created at `target`.
    pub fn new(target: VirtualPath) -> Self {
        Self {
            content: Vec::new(),
            dirty: false,
            target,
        }
    }

    /// Write `data` at `offset`, zero-filling any gap past the current end.
    ///
    /// Grows geometrically so sequential writes stay linear overall.
    /// Returns the number of bytes written, always `data.len()`, or `EFBIG`
    /// when the write would grow the file past [`MAX_STAGED_LEN`].
    pub fn write(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_STAGED_LEN)
            .ok_or_else(too_large)?;
        // Bounded by MAX_STAGED_LEN above.
        #[allow(clippy::cast_possible_truncation)]
        let (offset, end) = (offset as usize, end as usize);

        if end > self.content.len() {
            let wanted = std::cmp::max(end, (self.content.capacity() * 3) / 2);
            if wanted > self.content.capacity() {
                self.content.reserve(wanted - self.content.len());
            }
            self.content.resize(end, 0);
        }

        self.content[offset..end].copy_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    /// Read up to `size` bytes at `offset`. Empty past the end.
    pub fn read(&self, offset: u64, size: usize) -> &[u8] {
        let Ok(offset) = usize::try_from(offset) else {
            return &[];
        };
        if offset >= self.content.len() {
            return &[];
        }
        let end = offset.saturating_add(size).min(self.content.len());
        &self.content[offset..end]
    }

    /// Resize to `size`, zero-extending when growing.
    pub fn truncate(&mut self, size: u64) -> io::Result<()> {
        if size > MAX_STAGED_LEN {
            return Err(too_large());
        }
        #[allow(clippy::cast_possible_truncation)]
        let size = size as usize;
        if size != self.content.len() {
            self.content.resize(size, 0);
            self.dirty = true;
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether anything was written since creation.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn target(&self) -> &VirtualPath {
        &self.target
    }

    /// Move the pending file, after a rename of the staged entry.
    pub fn retarget(&mut self, target: VirtualPath) {
        self.target = target;
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Consume the buffer and return its content.
    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}

fn too_large() -> io::Error {
    io::Error::from_raw_os_error(libc::EFBIG)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> WriteBuffer {
        WriteBuffer::new(VirtualPath::new("/Vacation/p1.jpg"))
    }

    #[test]
    fn test_new_buffer_is_clean() {
        let buf = buffer();
        assert!(buf.is_empty());
        assert!(!buf.is_dirty());
        assert_eq!(buf.target().as_str(), "Vacation/p1.jpg");
    }

    #[test]
    fn test_write_extends_with_zero_gap() {
        let mut buf = buffer();
        buf.write(0, &[1, 2, 3]).unwrap();
        assert_eq!(buf.write(5, b"xyz").unwrap(), 3);
        assert_eq!(buf.content(), &[1, 2, 3, 0, 0, b'x', b'y', b'z']);
    }

    #[test]
    fn test_overwrite_preserves_surrounding() {
        let mut buf = buffer();
        buf.write(0, b"hello world").unwrap();
        buf.write(6, b"WORLD").unwrap();
        assert_eq!(buf.content(), b"hello WORLD");
    }

    #[test]
    fn test_zero_length_write_marks_dirty() {
        let mut buf = buffer();
        assert_eq!(buf.write(0, b"").unwrap(), 0);
        assert!(buf.is_empty());
        assert!(buf.is_dirty());
    }

    #[test]
    fn test_read_clamps_to_end() {
        let mut buf = buffer();
        buf.write(0, b"hello world").unwrap();
        assert_eq!(buf.read(6, 100), b"world");
        assert_eq!(buf.read(100, 10), b"");
        assert_eq!(buf.read(u64::MAX, 10), b"");
    }

    #[test]
    fn test_truncate() {
        let mut buf = buffer();
        buf.truncate(0).unwrap();
        assert!(!buf.is_dirty());

        buf.write(0, b"hello").unwrap();
        buf.truncate(2).unwrap();
        assert_eq!(buf.content(), b"he");
        buf.truncate(4).unwrap();
        assert_eq!(buf.content(), b"he\0\0");
    }

    #[test]
    fn test_oversized_write_is_efbig() {
        let mut buf = buffer();
        let err = buf.write(MAX_STAGED_LEN, b"x").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EFBIG));
        let err = buf.write(u64::MAX, b"x").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EFBIG));
        assert!(buf.truncate(MAX_STAGED_LEN + 1).is_err());
        assert!(!buf.is_dirty());
    }

    #[test]
    fn test_retarget() {
        let mut buf = buffer();
        buf.retarget(VirtualPath::new("/Family/p1.jpg"));
        assert_eq!(buf.target(), &VirtualPath::new("/Family/p1.jpg"));
    }
}
