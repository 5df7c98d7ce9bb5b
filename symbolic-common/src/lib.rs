//! Common functionality for `symbolic`.
//!
//! This crate exposes a set of key types:
//!
//!  - [`Arch`]: The CPU architecture a compilation unit was built for.
//!  - [`Language`]: The source language declared by a compilation unit.
//!  - Functions and utilities to deal with paths and qualified names from different platforms.
//!
//! This module is part of the `symbolic` crate.

#![warn(missing_docs)]

mod path;
mod types;

pub use crate::path::*;
pub use crate::types::*;
