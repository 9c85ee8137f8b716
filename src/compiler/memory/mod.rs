//! # Memory Model
//!
//! Memory-level values are flattened into scalar variables and integer-indexed maps:
//!
//! ```text
//! struct S { a: u64, v: vector<u8> }        top level          inside a composed map
//! ----------------------------------        ---------          ---------------------
//! s.a                                       s.a!value          [off + 0]
//! s.v                                       s.v!length         [off + 1]
//!                                           s.v!digest         [off + 2]
//!                                           s.v!content        [off + 3 ..]
//! ```
//!
//! - [`layout`] decides which variables hold a value
//! - [`location`] addresses a value inside a layout and reads or writes it
//! - [`lower`] rewrites a memory-level program into core IR

pub mod layout;
pub mod location;
pub mod lower;

pub use layout::{Layout, RefLayout, ValueLayout};
pub use location::MemoryLocation;
pub use lower::lower_program;
