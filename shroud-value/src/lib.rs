//! A schema-less tagged value tree with a compact binary encoding, used
//! for every on-wire and in-storage piece of metadata in the workspace
//! (packet heads, message "meta" blocks, account info).

mod error;
mod value;

pub use error::Error;
pub use value::{Object, Value};
