//! Locked-memory pool for key material and other secrets.
//!
//! Mirrors the original `SecMem` allocator: a small number of `mlock`-ed
//! pages carved up with a first-fit free list. Blocks are zeroed before
//! they are returned to the free list so a secret never outlives its
//! owner in RAM (short of swap, which `mlock` also prevents).

use std::sync::Mutex;

use zeroize::Zeroize;

/// Default pool size: enough for a handful of AES keys, RSA keys and
/// session nonces without ever growing.
const DEFAULT_POOL_SIZE: usize = 64 * 1024;

const ALIGN: usize = 16;

struct FreeBlock {
    offset: usize,
    size: usize,
}

struct Pool {
    base: *mut u8,
    size: usize,
    free: Vec<FreeBlock>,
}

unsafe impl Send for Pool {}

impl Pool {
    fn new(size: usize) -> Result<Self, SecMemError> {
        let page = page_size();
        let size = round_up(size, page);
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(SecMemError::Mmap(std::io::Error::last_os_error()));
        }
        let base = base as *mut u8;
        if unsafe { libc::mlock(base as *const libc::c_void, size) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::munmap(base as *mut libc::c_void, size) };
            return Err(SecMemError::Mlock(err));
        }
        Ok(Pool {
            base,
            size,
            free: vec![FreeBlock { offset: 0, size }],
        })
    }

    fn alloc(&mut self, len: usize) -> Option<*mut u8> {
        let len = round_up(len.max(1), ALIGN);
        let idx = self
            .free
            .iter()
            .position(|b| b.size >= len)?;
        let block = &mut self.free[idx];
        let offset = block.offset;
        if block.size == len {
            self.free.remove(idx);
        } else {
            block.offset += len;
            block.size -= len;
        }
        Some(unsafe { self.base.add(offset) })
    }

    fn free(&mut self, ptr: *mut u8, len: usize) {
        let len = round_up(len.max(1), ALIGN);
        let offset = (ptr as usize) - (self.base as usize);
        unsafe {
            std::slice::from_raw_parts_mut(ptr, len).zeroize();
        }
        self.free.push(FreeBlock { offset, size: len });
        self.free.sort_by_key(|b| b.offset);
        let mut merged: Vec<FreeBlock> = Vec::with_capacity(self.free.len());
        for b in self.free.drain(..) {
            if let Some(last) = merged.last_mut() {
                let last: &mut FreeBlock = last;
                if last.offset + last.size == b.offset {
                    last.size += b.size;
                    continue;
                }
            }
            merged.push(b);
        }
        self.free = merged;
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        unsafe {
            std::ptr::write_bytes(self.base, 0, self.size);
            libc::munlock(self.base as *const libc::c_void, self.size);
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}

#[derive(Debug)]
pub enum SecMemError {
    Mmap(std::io::Error),
    Mlock(std::io::Error),
    OutOfMemory,
}

impl std::fmt::Display for SecMemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecMemError::Mmap(e) => write!(f, "secure pool mmap failed: {e}"),
            SecMemError::Mlock(e) => write!(f, "secure pool mlock failed: {e}"),
            SecMemError::OutOfMemory => write!(f, "secure pool exhausted"),
        }
    }
}

impl std::error::Error for SecMemError {}

static POOL: Mutex<Option<Pool>> = Mutex::new(None);

fn with_pool<R>(f: impl FnOnce(&mut Pool) -> R) -> Result<R, SecMemError> {
    let mut guard = POOL.lock().unwrap();
    if guard.is_none() {
        *guard = Some(Pool::new(DEFAULT_POOL_SIZE)?);
    }
    Ok(f(guard.as_mut().unwrap()))
}

/// A heap allocation backed by the locked-memory pool. Zeroed on drop.
pub struct SecureBox {
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for SecureBox {}

impl SecureBox {
    pub fn alloc(len: usize) -> Result<Self, SecMemError> {
        let ptr = with_pool(|pool| pool.alloc(len))?.ok_or(SecMemError::OutOfMemory)?;
        unsafe { std::ptr::write_bytes(ptr, 0, len) };
        Ok(SecureBox { ptr, len })
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SecureBox {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        if let Ok(mut guard) = POOL.lock() {
            if let Some(pool) = guard.as_mut() {
                pool.free(self.ptr, self.len);
            }
        }
    }
}

fn page_size() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n <= 0 {
        4096
    } else {
        n as usize
    }
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_zeroed_and_writable() {
        let mut b = SecureBox::alloc(32).unwrap();
        assert_eq!(b.as_slice(), &[0u8; 32][..]);
        b.as_mut_slice()[0] = 0xff;
        assert_eq!(b.as_slice()[0], 0xff);
    }

    #[test]
    fn free_and_reuse() {
        let a = SecureBox::alloc(128).unwrap();
        drop(a);
        let b = SecureBox::alloc(128).unwrap();
        assert_eq!(b.len(), 128);
    }

    #[test]
    fn empty_alloc() {
        let b = SecureBox::alloc(0).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.as_slice(), &[] as &[u8]);
    }
}
