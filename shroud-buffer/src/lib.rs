//! Fixed-size byte buffers and a locked-memory allocator for secrets.
//!
//! [`Buffer`] is the value type every other crate in the workspace moves
//! key material, packet bodies and blob contents through. It never grows
//! after construction and its backing storage is allocated from a small
//! `mlock`-ed pool ([`secmem`]) so secrets are zeroed on drop and never
//! swapped to disk.

mod buffer;
mod secmem;

pub use buffer::Buffer;
pub use secmem::{SecMemError, SecureBox};
