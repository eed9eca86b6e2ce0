//! Session source implementations
//!
//! - [`ReplaySource`] serves recorded sessions from a directory of YAML files

mod replay;

pub use replay::{Recording, ReplaySession, ReplaySource};
