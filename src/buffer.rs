//! Byte buffer (spec.md §4.1): a contiguous, resizable byte store with
//! head-slide drain and a change callback.
//!
//! Grounded on `src/buf/ring.rs`'s raw-pointer allocation style, modernized
//! from its pre-1.0 `alloc::heap`/`std::raw` API to `std::alloc`.

use std::alloc::{self, Layout};
use std::cmp;
use std::io::{self, Read, Write};
use std::ptr::{self, NonNull};

const MIN_CAPACITY: usize = 256;

/// Invoked whenever `off` (the valid-byte count) changes through a mutating
/// operation, with the old and new length.
pub type ChangeCallback = Box<dyn FnMut(usize, usize)>;

/// A contiguous resizable byte buffer with four logical cursors: `orig`
/// (allocation base), `head` (logical start of valid bytes), `misalign`
/// (`head - orig`), `off` (valid byte count), and `totallen` (allocation
/// size). Invariant: `misalign + off <= totallen`.
pub struct ByteBuffer {
    ptr: Option<NonNull<u8>>,
    totallen: usize,
    misalign: usize,
    off: usize,
    cb: Option<ChangeCallback>,
}

// SAFETY: ByteBuffer owns its allocation exclusively; there is no shared
// mutable state beyond the single-threaded reactor that drives it.
unsafe impl Send for ByteBuffer {}

impl ByteBuffer {
    pub fn new() -> ByteBuffer {
        ByteBuffer {
            ptr: None,
            totallen: 0,
            misalign: 0,
            off: 0,
            cb: None,
        }
    }

    /// Installs the change callback. Does not itself fire.
    pub fn set_cb(&mut self, cb: ChangeCallback) {
        self.cb = Some(cb);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.off
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.off == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.totallen
    }

    fn fire(&mut self, old_off: usize, new_off: usize) {
        if old_off != new_off {
            if let Some(cb) = self.cb.as_mut() {
                cb(old_off, new_off);
            }
        }
    }

    /// Pointer to the first valid byte (`head`), valid only while `off > 0`.
    fn head_ptr(&self) -> *mut u8 {
        // SAFETY: `ptr` is Some whenever `totallen > 0`; `misalign <= totallen`.
        unsafe { self.ptr.unwrap().as_ptr().add(self.misalign) }
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.off == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.head_ptr(), self.off) }
        }
    }

    /// Ensures at least `misalign + off + extra` bytes of capacity, sliding
    /// or reallocating per the policy in spec.md §4.1. Grounded on
    /// `examples/original_source/buffer.c`'s `evbuffer_add`: `needed` is
    /// computed before sliding, and when sliding alone can't cover it the
    /// new capacity is found by doubling the *current* `totallen` (not a
    /// capacity derived from `off + extra` alone) until it is `>= needed`.
    fn ensure_capacity(&mut self, extra: usize) -> io::Result<()> {
        let needed = self.misalign + self.off + extra;
        if needed <= self.totallen {
            return Ok(());
        }

        if self.misalign >= extra {
            self.slide_to_origin();
            return Ok(());
        }

        let mut new_cap = cmp::max(self.totallen, MIN_CAPACITY);
        while new_cap < needed {
            new_cap *= 2;
        }
        self.slide_to_origin();
        self.grow_to(new_cap)
    }

    /// Moves `[head, head+off)` down to the allocation base, resetting
    /// `misalign` to 0. A no-op if already aligned.
    fn slide_to_origin(&mut self) {
        if self.misalign == 0 || self.off == 0 {
            self.misalign = 0;
            return;
        }
        // SAFETY: source and dest are both within the same allocation and
        // the ranges may overlap, hence copy (not copy_nonoverlapping).
        unsafe {
            let base = self.ptr.unwrap().as_ptr();
            let src = base.add(self.misalign);
            ptr::copy(src, base, self.off);
        }
        self.misalign = 0;
    }

    fn grow_to(&mut self, new_cap: usize) -> io::Result<()> {
        debug_assert!(new_cap >= self.off);
        let new_layout = Layout::array::<u8>(new_cap)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "capacity overflow"))?;

        let new_ptr = unsafe {
            match self.ptr {
                Some(old) if self.totallen > 0 => {
                    let old_layout = Layout::array::<u8>(self.totallen).unwrap();
                    alloc::realloc(old.as_ptr(), old_layout, new_layout.size())
                }
                _ => alloc::alloc(new_layout),
            }
        };

        let new_ptr = NonNull::new(new_ptr)
            .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "allocation failed"))?;

        self.ptr = Some(new_ptr);
        self.totallen = new_cap;
        Ok(())
    }

    /// Appends `data`, growing/sliding as needed. Fires the change callback
    /// with `(old_off, old_off + data.len())` when `data` is non-empty.
    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.ensure_capacity(data.len())?;
        let old_off = self.off;
        unsafe {
            let dst = self.ptr.unwrap().as_ptr().add(self.misalign + self.off);
            ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        self.off += data.len();
        self.fire(old_off, self.off);
        Ok(())
    }

    /// Drains `n` bytes from the head. If `n >= len`, resets to empty.
    pub fn drain(&mut self, n: usize) {
        let old_off = self.off;
        if n >= self.off {
            self.off = 0;
            self.misalign = 0;
        } else {
            self.misalign += n;
            self.off -= n;
        }
        self.fire(old_off, self.off);
    }

    /// Copies up to `min(dst.len(), len())` bytes into `dst` and drains
    /// them. Returns the number of bytes copied.
    pub fn remove(&mut self, dst: &mut [u8]) -> usize {
        let n = cmp::min(dst.len(), self.off);
        if n > 0 {
            unsafe {
                ptr::copy_nonoverlapping(self.head_ptr(), dst.as_mut_ptr(), n);
            }
        }
        self.drain(n);
        n
    }

    /// Destructive move from `src` into `self`. If `self` is empty, this is
    /// an O(1) cursor swap; otherwise falls back to append + drain.
    ///
    /// Fires `self`'s callback before `src`'s (see `SPEC_FULL.md` §9 (a)):
    /// `self` is the buffer whose externally visible length changed first in
    /// program order.
    pub fn absorb(&mut self, src: &mut ByteBuffer) -> io::Result<()> {
        if self.off == 0 {
            let self_old = self.off;
            let src_old = src.off;

            std::mem::swap(&mut self.ptr, &mut src.ptr);
            std::mem::swap(&mut self.totallen, &mut src.totallen);
            std::mem::swap(&mut self.misalign, &mut src.misalign);
            std::mem::swap(&mut self.off, &mut src.off);

            self.fire(self_old, self.off);
            src.fire(src_old, src.off);
            Ok(())
        } else {
            self.append(src.as_slice())?;
            src.drain(src.off);
            Ok(())
        }
    }

    /// Formats `args` into a scratch buffer and appends the result.
    pub fn printf(&mut self, args: std::fmt::Arguments<'_>) -> io::Result<()> {
        use std::fmt::Write as _;
        let mut scratch = String::new();
        scratch
            .write_fmt(args)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "formatting failed"))?;
        self.append(scratch.as_bytes())
    }

    /// Linear scan for the first occurrence of `needle`, using a first-byte
    /// heuristic (scan by first byte, verify with a full compare).
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.off {
            return None;
        }
        let hay = self.as_slice();
        let first = needle[0];
        let last_start = hay.len() - needle.len();
        for start in 0..=last_start {
            if hay[start] == first && &hay[start..start + needle.len()] == needle {
                return Some(start);
            }
        }
        None
    }

    /// Reads up to `min(cap, 4096)` bytes from `fd` and appends them.
    /// Returns the number of bytes read, 0 for EOF, or an error (transient
    /// errors are never returned here — the caller only sees real ones).
    pub fn read_from<R: Read>(&mut self, reader: &mut R, cap: usize) -> io::Result<usize> {
        let cap = if cap == usize::MAX { 4096 } else { cmp::min(cap, 4096) };
        let mut scratch = vec![0u8; cap];
        loop {
            match reader.read(&mut scratch) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    self.append(&scratch[..n])?;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes `[head, head+off)` to `writer`, draining what was actually
    /// written. Returns bytes written, 0 for EOF (nothing to write and the
    /// peer is gone), or an error.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        loop {
            if self.off == 0 {
                return Ok(0);
            }
            match writer.write(self.as_slice()) {
                Ok(n) => {
                    self.drain(n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        ByteBuffer::new()
    }
}

impl Drop for ByteBuffer {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr {
            if self.totallen > 0 {
                let layout = Layout::array::<u8>(self.totallen).unwrap();
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
            }
        }
    }
}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("off", &self.off)
            .field("misalign", &self.misalign)
            .field("totallen", &self.totallen)
            .finish()
    }
}
