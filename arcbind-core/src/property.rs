//! Property marshaling.
//!
//! The foreign module answers every metadata query with a dynamically
//! typed [`RawProp`] cell. This module is the single conversion
//! boundary that turns a cell into one of a small closed set of host
//! values, with defined behavior for empty and mismatched cells:
//! an empty cell is reported as [`Error::EmptyProperty`], never as a
//! type error; any tag other than the requested one is
//! [`Error::InconsistentPropertyType`].

use std::slice;

use crate::abi::{prop_tag, RawProp};
use crate::error::{Error, Result};

/// The type tag of a property cell, as visible to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    Unknown,
    Empty,
    Bool,
    Int,
    Long,
    Str,
    Bytes,
}

/// A property value converted out of a foreign cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    Empty,
    Bool(bool),
    Int(u32),
    Long(u64),
    Str(String),
    Bytes(Vec<u8>),
}

/// Releases a foreign-allocated cell exactly once, on every path out
/// of the conversion.
struct RawPropGuard(RawProp);

impl Drop for RawPropGuard {
    fn drop(&mut self) {
        if let Some(release) = self.0.release.take() {
            unsafe { release(&mut self.0) };
        }
    }
}

impl PropValue {
    /// Converts a cell the foreign module just filled in, releasing
    /// any module-allocated buffer it carries.
    ///
    /// # Safety
    /// `cell` must be a cell filled in by the module: for `STR` and
    /// `BYTES` tags, `data`/`len` must describe a valid readable
    /// region, and `release` (when set) must be callable exactly once.
    pub(crate) unsafe fn take_raw(cell: RawProp) -> PropValue {
        let guard = RawPropGuard(cell);
        let cell = &guard.0;

        match cell.tag {
            prop_tag::BOOL => PropValue::Bool(cell.bool_val != 0),
            prop_tag::U32 => PropValue::Int(cell.u32_val),
            prop_tag::U64 => PropValue::Long(cell.u64_val),
            prop_tag::STR => {
                if cell.data.is_null() {
                    PropValue::Str(String::new())
                } else {
                    let units =
                        slice::from_raw_parts(cell.data as *const u16, cell.len as usize);
                    // Code units copied as-is; lone surrogates become
                    // U+FFFD rather than failing the whole lookup.
                    PropValue::Str(String::from_utf16_lossy(units))
                }
            }
            prop_tag::BYTES => {
                if cell.data.is_null() {
                    PropValue::Bytes(Vec::new())
                } else {
                    let bytes =
                        slice::from_raw_parts(cell.data as *const u8, cell.len as usize);
                    PropValue::Bytes(bytes.to_vec())
                }
            }
            _ => PropValue::Empty,
        }
    }

    pub fn prop_type(&self) -> PropType {
        match self {
            PropValue::Empty => PropType::Empty,
            PropValue::Bool(_) => PropType::Bool,
            PropValue::Int(_) => PropType::Int,
            PropValue::Long(_) => PropType::Long,
            PropValue::Str(_) => PropType::Str,
            PropValue::Bytes(_) => PropType::Bytes,
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            PropValue::Bool(v) => Ok(v),
            PropValue::Empty => Err(Error::EmptyProperty),
            _ => Err(Error::InconsistentPropertyType),
        }
    }

    pub fn into_int(self) -> Result<u32> {
        match self {
            PropValue::Int(v) => Ok(v),
            PropValue::Empty => Err(Error::EmptyProperty),
            _ => Err(Error::InconsistentPropertyType),
        }
    }

    /// Accepts both 32- and 64-bit cells; a module is free to store a
    /// small size in the narrow encoding.
    pub fn into_long(self) -> Result<u64> {
        match self {
            PropValue::Long(v) => Ok(v),
            PropValue::Int(v) => Ok(u64::from(v)),
            PropValue::Empty => Err(Error::EmptyProperty),
            _ => Err(Error::InconsistentPropertyType),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            PropValue::Str(v) => Ok(v),
            PropValue::Empty => Err(Error::EmptyProperty),
            _ => Err(Error::InconsistentPropertyType),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            PropValue::Bytes(v) => Ok(v),
            PropValue::Empty => Err(Error::EmptyProperty),
            _ => Err(Error::InconsistentPropertyType),
        }
    }
}
