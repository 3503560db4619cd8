//! Error taxonomy for the codec bridge.

use std::path::PathBuf;

use thiserror::Error;

use crate::abi::{rc, HResult};

/// Errors surfaced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load codec module {path}: {reason}")]
    ModuleLoad { path: PathBuf, reason: String },

    #[error("codec module is missing entry point `{0}`")]
    MissingEntryPoint(&'static str),

    #[error("unknown archive format")]
    UnknownFormat,

    #[error("inconsistent property type")]
    InconsistentPropertyType,

    #[error("empty property")]
    EmptyProperty,

    #[error("host-side fault: {0}")]
    HostFault(String),

    #[error("{0}")]
    WrongPassword(&'static str),

    #[error("this archive session is closed")]
    SessionClosed,

    #[error("codec module ran out of memory")]
    OutOfMemory,

    #[error("internal invariant violation in the codec bridge")]
    Internal,

    #[error("codec module reported error code {0}")]
    Foreign(HResult),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps a nonzero foreign result code to the host taxonomy.
    /// Password-related codes collapse into [`Error::WrongPassword`]
    /// so the host can prompt for a retry; codes without a host-side
    /// meaning stay foreign.
    pub(crate) fn from_code(code: HResult) -> Error {
        match code {
            rc::E_UNKNOWN_FORMAT => Error::UnknownFormat,
            rc::E_INCONSISTENT_PROP_TYPE => Error::InconsistentPropertyType,
            rc::E_EMPTY_PROP => Error::EmptyProperty,
            rc::E_HOST_FAULT => Error::HostFault("host callback failed".to_string()),
            rc::E_OUT_OF_MEMORY => Error::OutOfMemory,
            rc::E_INTERNAL => Error::Internal,
            rc::E_WRONG_PASSWORD => Error::WrongPassword("wrong password"),
            rc::E_NO_PASSWORD => {
                Error::WrongPassword("a password is required but none was given")
            }
            rc::E_DATA_ERROR_ENCRYPTED => {
                Error::WrongPassword("data error in encrypted entry; wrong password?")
            }
            rc::E_CRC_ERROR_ENCRYPTED => {
                Error::WrongPassword("checksum failed in encrypted entry; wrong password?")
            }
            other => Error::Foreign(other),
        }
    }
}
