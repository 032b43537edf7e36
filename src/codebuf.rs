//! Executable code buffer (component C).
//!
//! Grounded on `examples/original_source/src/Kernel.h` (the
//! `m_buffer`/`m_labels`/`m_kernel` triple and the
//! `alloc_mmap`/`set_exec`/`release_mmap` split), re-expressed with
//! `libc` directly rather than a second memory-mapping crate — the
//! teacher already pulls in `libc` for other raw-memory needs.

use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by the code buffer (§7: *buffer-frozen*, unknown label).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("cannot append to a materialized (frozen) code buffer")]
    Frozen,

    #[error("label {0:?} was never recorded in this buffer")]
    UnknownLabel(String),

    #[error("mmap failed while allocating {0} bytes")]
    MmapFailed(usize),

    #[error("mprotect failed while transitioning {0} bytes to executable")]
    MprotectFailed(usize),
}

pub type BufferResult<T> = Result<T, BufferError>;

/// An owned, growable buffer of 32-bit AArch64 instruction words that can
/// be materialized into an executable memory region and invoked as a
/// typed function pointer.
///
/// Appending is permitted only until [`Code::materialize`] succeeds;
/// afterwards the buffer is frozen (§4.2: "Any attempt to append after
/// materialization fails with *buffer-frozen*"). Materializing again
/// after further (impossible, once frozen) mutation is not reachable
/// through the public API, so `materialize` is naturally idempotent:
/// calling it twice on an unchanged buffer just re-returns the same
/// executable region.
pub struct Code {
    words: Vec<u32>,
    labels: HashMap<String, usize>,
    region: Option<ExecRegion>,
}

/// The mmap'd, now-executable region backing a materialized [`Code`]
/// buffer. Released on drop.
struct ExecRegion {
    ptr: *mut libc::c_void,
    len: usize,
}

// SAFETY: the region is read/exec only after materialization; no interior
// mutability is exposed, and the pointer is never dereferenced from Rust
// except through the typed function-pointer cast the caller requests.
unsafe impl Send for ExecRegion {}
unsafe impl Sync for ExecRegion {}

impl Drop for ExecRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

impl Default for Code {
    fn default() -> Self {
        Self::new()
    }
}

impl Code {
    pub fn new() -> Self {
        Code {
            words: Vec::new(),
            labels: HashMap::new(),
            region: None,
        }
    }

    fn check_writable(&self) -> BufferResult<()> {
        if self.region.is_some() {
            return Err(BufferError::Frozen);
        }
        Ok(())
    }

    /// Appends a single instruction word.
    pub fn add_instr(&mut self, word: u32) -> BufferResult<()> {
        self.check_writable()?;
        self.words.push(word);
        Ok(())
    }

    /// Appends a sequence of instruction words.
    pub fn add_instrs(&mut self, words: impl IntoIterator<Item = u32>) -> BufferResult<()> {
        self.check_writable()?;
        self.words.extend(words);
        Ok(())
    }

    /// Records the current instruction offset under `label`.
    pub fn add_label(&mut self, label: impl Into<String>) -> BufferResult<()> {
        self.check_writable()?;
        self.labels.insert(label.into(), self.words.len());
        Ok(())
    }

    /// Number of instructions appended since `label` was recorded — used
    /// by callers computing a backward branch displacement.
    pub fn instrs_since_label(&self, label: &str) -> BufferResult<usize> {
        let start = self
            .labels
            .get(label)
            .ok_or_else(|| BufferError::UnknownLabel(label.to_string()))?;
        Ok(self.words.len() - start)
    }

    /// Current buffer size, in bytes.
    pub fn size_bytes(&self) -> usize {
        self.words.len() * 4
    }

    /// Writes the raw instruction words to `path`, little-endian, for
    /// offline disassembly (§6/§12 debug visibility).
    pub fn write(&self, path: &std::path::Path) -> std::io::Result<()> {
        let mut bytes = Vec::with_capacity(self.words.len() * 4);
        for w in &self.words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        std::fs::write(path, bytes)
    }

    /// Materializes the buffer into executable memory, in the three
    /// phases mandated by §4.2: allocate writable, copy, transition to
    /// executable + flush icache. Returns the base address as a raw
    /// pointer; callers cast it to the kernel's specific `extern "C"` fn
    /// pointer type.
    pub fn materialize(&mut self) -> BufferResult<*const ()> {
        if let Some(region) = &self.region {
            return Ok(region.ptr as *const ());
        }

        let len = self.size_bytes().max(1);

        // Phase 1: acquire a fresh writable region.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(BufferError::MmapFailed(len));
        }

        // Phase 2: copy the words linearly.
        unsafe {
            std::ptr::copy_nonoverlapping(self.words.as_ptr() as *const u8, ptr as *mut u8, self.size_bytes());
        }

        // Phase 3: transition to executable and flush the instruction cache.
        let rc = unsafe { libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_EXEC) };
        if rc != 0 {
            unsafe {
                libc::munmap(ptr, len);
            }
            return Err(BufferError::MprotectFailed(len));
        }
        flush_icache(ptr as *const u8, len);

        self.region = Some(ExecRegion { ptr, len });
        Ok(ptr as *const ())
    }

    /// Reinterprets the materialized region as a typed function pointer.
    /// Panics (via `debug_assert!`) in debug builds if called before
    /// materialization — callers are expected to call `materialize`
    /// first, matching the buffer's state-machine contract.
    ///
    /// # Safety
    /// The caller must ensure `F` matches the C-ABI signature the
    /// generated code actually implements.
    pub unsafe fn as_fn<F>(&self) -> F
    where
        F: Copy,
    {
        debug_assert!(self.region.is_some(), "buffer not materialized");
        let ptr = self.region.as_ref().expect("buffer not materialized").ptr;
        std::mem::transmute_copy(&(ptr as *const ()))
    }
}

#[cfg(target_arch = "aarch64")]
fn flush_icache(start: *const u8, len: usize) {
    extern "C" {
        fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
    }
    unsafe {
        let begin = start as *mut libc::c_char;
        let end = start.add(len) as *mut libc::c_char;
        __clear_cache(begin, end);
    }
}

#[cfg(not(target_arch = "aarch64"))]
fn flush_icache(_start: *const u8, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_after_materialize_is_rejected() {
        let mut code = Code::new();
        code.add_instr(0xD65F03C0).unwrap(); // ret
        code.materialize().unwrap();
        assert_eq!(code.add_instr(0xD65F03C0), Err(BufferError::Frozen));
    }

    #[test]
    fn label_tracks_instruction_offset() {
        let mut code = Code::new();
        code.add_instr(0).unwrap();
        code.add_label("loop").unwrap();
        code.add_instr(0).unwrap();
        code.add_instr(0).unwrap();
        assert_eq!(code.instrs_since_label("loop").unwrap(), 2);
    }

    #[test]
    fn unknown_label_is_an_error() {
        let code = Code::new();
        assert!(matches!(code.instrs_since_label("nope"), Err(BufferError::UnknownLabel(_))));
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn materialize_and_call_ret_only_kernel() {
        let mut code = Code::new();
        code.add_instr(0xD65F03C0).unwrap(); // ret
        code.materialize().unwrap();
        let f: extern "C" fn() = unsafe { code.as_fn() };
        f();
    }
}
