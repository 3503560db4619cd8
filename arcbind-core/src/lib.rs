//! arcbind-core - host-side bridge to a dynamically loaded codec module
//!
//! A codec module is a shared library that registers compression
//! methods and container formats and parses archives. This crate loads
//! one such module per process, discovers its format tables, matches
//! input streams against registered byte signatures and exposes opened
//! archives through [`ArchiveSession`]: entry enumeration, typed
//! metadata properties and single-entry extraction into host sinks.
//!
//! The foreign side of the contract lives in [`abi`]; everything else
//! is host-side plumbing around it.

pub mod abi;
mod error;
mod matcher;
pub mod property;
pub mod registry;
mod session;
pub mod stream;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
pub use property::{PropType, PropValue};
pub use registry::{CodecRegistry, Format, Method};
pub use session::ArchiveSession;
pub use stream::{
    FileSink, FileSource, HostFault, InputSource, MemorySink, MemorySource, OutputSink,
};
