//! The `persistence` module holds the server's durable and lookup state.
//!
//! - [`sled_store`]: the session directory, mapping a connection client id
//!   to the account it bound as. Stored in `sled` so bindings survive a
//!   gateway restart.
//! - [`directory`]: the organisation (employees, departments, groups) the
//!   business handlers read.

pub mod directory;
pub mod sled_store;

pub use directory::{Department, Directory, DirectorySeed, Employee, Group, MemoryDirectory};
pub use sled_store::{SessionBinding, SessionDirectory, SessionStore};

#[cfg(test)]
mod tests;
