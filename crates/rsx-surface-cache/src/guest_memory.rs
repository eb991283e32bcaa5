//! Guest memory abstraction used when writing GPU-resident surfaces back to system memory.
//!
//! The emulator provides an implementation backed by its memory system. Faulting guest threads
//! and the render thread touch guest memory concurrently, so both operations take `&self`.

use core::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestMemoryError {
    pub addr: u64,
    pub len: usize,
}

impl fmt::Display for GuestMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guest memory access out of bounds: addr=0x{:x}, len=0x{:x}",
            self.addr, self.len
        )
    }
}

impl std::error::Error for GuestMemoryError {}

/// Minimal guest memory interface.
pub trait GuestMemory: Send + Sync {
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<(), GuestMemoryError>;
    fn write(&self, addr: u64, src: &[u8]) -> Result<(), GuestMemoryError>;
}

/// Simple contiguous guest RAM starting at address 0, for tests and tools.
#[derive(Debug)]
pub struct VecGuestMemory {
    mem: Mutex<Vec<u8>>,
}

impl VecGuestMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            mem: Mutex::new(vec![0u8; size_bytes]),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the whole RAM image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, GuestMemoryError> {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, GuestMemoryError> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u8(&self, addr: u64, val: u8) -> Result<(), GuestMemoryError> {
        self.write(addr, &[val])
    }

    pub fn fill(&self, addr: u64, len: usize, val: u8) -> Result<(), GuestMemoryError> {
        let mut mem = self.lock();
        let range = Self::range(&mem, addr, len)?;
        mem[range].fill(val);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.mem.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn range(mem: &[u8], addr: u64, len: usize) -> Result<core::ops::Range<usize>, GuestMemoryError> {
        let err = GuestMemoryError { addr, len };
        let start = usize::try_from(addr).map_err(|_| err.clone())?;
        let end = start.checked_add(len).ok_or_else(|| err.clone())?;
        if end > mem.len() {
            return Err(err);
        }
        Ok(start..end)
    }
}

impl GuestMemory for VecGuestMemory {
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        let mem = self.lock();
        let range = Self::range(&mem, addr, dst.len())?;
        dst.copy_from_slice(&mem[range]);
        Ok(())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<(), GuestMemoryError> {
        let mut mem = self.lock();
        let range = Self::range(&mem, addr, src.len())?;
        mem[range].copy_from_slice(src);
        Ok(())
    }
}
