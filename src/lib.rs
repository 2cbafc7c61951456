//! mess - encrypt a file in place with a key bound to this machine

#![forbid(unsafe_code)]

pub mod command;
pub mod container;
pub mod diagnostics;
pub mod error;
pub mod file_ops;
pub mod identity;
pub mod requirements;
