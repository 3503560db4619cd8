//! C ABI of the foreign codec module.
//!
//! A codec module is a shared library exporting five entry points:
//!
//! ```c
//! int32_t GetNumberOfMethods(uint32_t *count);
//! int32_t GetNumberOfFormats(uint32_t *count);
//! int32_t GetMethodProperty(uint32_t index, uint32_t prop_id, RawProp *value);
//! int32_t GetHandlerProperty(uint32_t index, uint32_t prop_id, RawProp *value);
//! int32_t CreateObject(const uint8_t *class_id, const uint8_t *iface_id, void **out);
//! ```
//!
//! Every call returns a signed 32-bit result code; zero is success and
//! any nonzero value is a failure from [`rc`].
//!
//! # Stability contract
//! - `#[repr(C)]` is mandatory on every struct here. Do not reorder
//!   fields. New fields go at the end only.
//! - The module never frees memory owned by the host and vice versa.
//!   Property cells that carry module-allocated buffers embed their own
//!   `release` function; the host calls it exactly once.
//!
//! # Thread safety
//! The entry points must be safe to call concurrently once the module
//! is loaded. Handler objects created by `CreateObject` are
//! single-owner and are never shared between threads by this crate.

use std::os::raw::c_void;

/// Signed result code. Zero is success.
pub type HResult = i32;

/// Opaque 16-byte identifier for formats and coders.
pub type ClassId = [u8; 16];

/// Opaque 16-byte interface identifier passed to `CreateObject`.
pub type InterfaceId = [u8; 16];

/// The one interface this crate requests from `CreateObject`: an
/// archive reader handler whose object layout starts with an
/// [`ArcHandlerVTable`] pointer.
pub const IID_IN_ARCHIVE: InterfaceId = *b"arcbind:inarch01";

/// Result codes shared between host and module.
pub mod rc {
    use super::HResult;

    /// Success.
    pub const OK: HResult = 0;
    /// Module-internal failure (allocation aside).
    pub const E_INTERNAL: HResult = -1;
    /// An argument was out of range or otherwise invalid.
    pub const E_INVALID_ARG: HResult = -2;
    /// The module could not allocate memory.
    pub const E_OUT_OF_MEMORY: HResult = -3;
    /// A host-side callback failed. Raised only by the host's own
    /// stream shims; the module merely propagates it outward.
    pub const E_HOST_FAULT: HResult = -4;
    /// No registered format accepted the stream.
    pub const E_UNKNOWN_FORMAT: HResult = -5;
    /// A property cell held a different type than requested.
    pub const E_INCONSISTENT_PROP_TYPE: HResult = -6;
    /// A property cell was empty.
    pub const E_EMPTY_PROP: HResult = -7;

    /// The payload data is corrupt.
    pub const E_DATA_ERROR: HResult = -16;
    /// Corrupt data in an encrypted entry; usually a wrong password.
    pub const E_DATA_ERROR_ENCRYPTED: HResult = -17;
    /// A checksum did not match.
    pub const E_CRC_ERROR: HResult = -18;
    /// Checksum failure in an encrypted entry; usually a wrong password.
    pub const E_CRC_ERROR_ENCRYPTED: HResult = -19;
    /// The supplied password was wrong.
    pub const E_WRONG_PASSWORD: HResult = -20;
    /// A password was required but none was supplied.
    pub const E_NO_PASSWORD: HResult = -21;
    /// The entry uses a compression method the module cannot decode.
    pub const E_UNSUPPORTED_METHOD: HResult = -22;
}

/// Type tags for [`RawProp`] cells.
pub mod prop_tag {
    pub const EMPTY: u16 = 0;
    pub const BOOL: u16 = 1;
    pub const U32: u16 = 2;
    pub const U64: u16 = 3;
    /// UTF-16 code units; `len` counts units, not bytes.
    pub const STR: u16 = 4;
    /// Raw bytes; `len` counts bytes.
    pub const BYTES: u16 = 5;
}

/// Property ids understood by `GetMethodProperty`.
pub mod method_prop {
    pub const NAME: u32 = 0;
    pub const DECODER: u32 = 1;
    pub const ENCODER: u32 = 2;
}

/// Property ids understood by `GetHandlerProperty`.
pub mod format_prop {
    pub const NAME: u32 = 0;
    pub const CLASS_ID: u32 = 1;
    pub const SIGNATURE: u32 = 2;
    pub const MULTI_SIGNATURE: u32 = 3;
    pub const SIGNATURE_OFFSET: u32 = 4;
}

/// Property ids for archive- and entry-scoped metadata. The set is
/// open-ended; these are the ids every module is expected to serve.
pub mod entry_prop {
    pub const PATH: u32 = 3;
    pub const NAME: u32 = 4;
    pub const IS_DIR: u32 = 6;
    pub const SIZE: u32 = 7;
    pub const PACKED_SIZE: u32 = 8;
    pub const ENCRYPTED: u32 = 9;
}

/// Seek origins for [`CInStream::seek`].
pub mod seek_origin {
    pub const SET: u32 = 0;
    pub const CUR: u32 = 1;
    pub const END: u32 = 2;
}

/// Ask modes passed to [`CExtractCallbacks::get_stream`]. Only
/// `EXTRACT` receives an output stream.
pub mod ask_mode {
    pub const EXTRACT: i32 = 0;
    pub const TEST: i32 = 1;
    pub const SKIP: i32 = 2;
}

/// One dynamically typed property cell.
///
/// The active payload is selected by `tag`. For `STR` and `BYTES` the
/// module may hand out a buffer it allocated itself; in that case it
/// sets `release`, and the host must call it exactly once after copying
/// the payload out. A null `release` means the buffer is static.
#[repr(C)]
pub struct RawProp {
    pub tag: u16,
    pub bool_val: u8,
    pub u32_val: u32,
    pub u64_val: u64,
    /// `STR`: pointer to UTF-16 code units. `BYTES`: pointer to bytes.
    pub data: *const c_void,
    /// Unit count for `STR`, byte count for `BYTES`.
    pub len: u32,
    pub release: Option<unsafe extern "C" fn(cell: *mut RawProp)>,
}

impl RawProp {
    pub const fn empty() -> Self {
        RawProp {
            tag: prop_tag::EMPTY,
            bool_val: 0,
            u32_val: 0,
            u64_val: 0,
            data: std::ptr::null(),
            len: 0,
            release: None,
        }
    }
}

/// `GetNumberOfMethods` / `GetNumberOfFormats`.
pub type GetNumberFn = unsafe extern "C" fn(count: *mut u32) -> HResult;

/// `GetMethodProperty` / `GetHandlerProperty`.
pub type GetPropertyFn =
    unsafe extern "C" fn(index: u32, prop_id: u32, value: *mut RawProp) -> HResult;

/// `CreateObject`.
pub type CreateObjectFn = unsafe extern "C" fn(
    class_id: *const ClassId,
    iface_id: *const InterfaceId,
    out: *mut *mut ArcHandler,
) -> HResult;

/// The resolved entry points of one codec module. Either all five
/// resolve or the module is rejected; no partial set is ever kept.
#[derive(Clone, Copy)]
pub struct EntryPoints {
    pub get_number_of_methods: GetNumberFn,
    pub get_number_of_formats: GetNumberFn,
    pub get_method_property: GetPropertyFn,
    pub get_handler_property: GetPropertyFn,
    pub create_object: CreateObjectFn,
}

/// Exported symbol names, in resolution order.
pub mod symbol {
    pub const GET_NUMBER_OF_METHODS: &[u8] = b"GetNumberOfMethods\0";
    pub const GET_NUMBER_OF_FORMATS: &[u8] = b"GetNumberOfFormats\0";
    pub const GET_METHOD_PROPERTY: &[u8] = b"GetMethodProperty\0";
    pub const GET_HANDLER_PROPERTY: &[u8] = b"GetHandlerProperty\0";
    pub const CREATE_OBJECT: &[u8] = b"CreateObject\0";
}

/// A live archive handler created by the module. The first field of
/// the object is always the vtable pointer; the rest of the layout is
/// private to the module.
#[repr(C)]
pub struct ArcHandler {
    pub vtable: *const ArcHandlerVTable,
}

/// Methods of an archive handler.
///
/// # Safety
/// `this` must be the pointer `CreateObject` produced, not yet
/// released. `open` must be called (and must succeed) before any of
/// `get_entry_count`, `get_archive_property`, `get_entry_property` or
/// `extract`. `release` ends the object's life; nothing may be called
/// after it.
#[repr(C)]
pub struct ArcHandlerVTable {
    /// Parse the container from `stream`, reading no further than
    /// `max_check_start` while probing for the header.
    pub open: unsafe extern "C" fn(
        this: *mut ArcHandler,
        stream: *mut CInStream,
        max_check_start: u64,
        callbacks: *mut COpenCallbacks,
    ) -> HResult,
    /// Drop any reference to the stream. Idempotent on the module side.
    pub close: unsafe extern "C" fn(this: *mut ArcHandler) -> HResult,
    pub get_entry_count:
        unsafe extern "C" fn(this: *mut ArcHandler, count: *mut u32) -> HResult,
    pub get_archive_property: unsafe extern "C" fn(
        this: *mut ArcHandler,
        prop_id: u32,
        value: *mut RawProp,
    ) -> HResult,
    pub get_entry_property: unsafe extern "C" fn(
        this: *mut ArcHandler,
        index: u32,
        prop_id: u32,
        value: *mut RawProp,
    ) -> HResult,
    /// Extract `count` entries named by `indices`. Output streams are
    /// requested one by one through `callbacks`.
    pub extract: unsafe extern "C" fn(
        this: *mut ArcHandler,
        indices: *const u32,
        count: u32,
        test_mode: i32,
        callbacks: *mut CExtractCallbacks,
    ) -> HResult,
    pub release: unsafe extern "C" fn(this: *mut ArcHandler),
}

/// Host-implemented random-access input stream. The module keeps the
/// pointer it received in `open` for the lifetime of the handler.
#[repr(C)]
pub struct CInStream {
    /// Read at most `size` bytes into `buf`. `*processed == 0` with a
    /// success code means end of stream. A single call may return
    /// fewer bytes than requested; callers loop.
    pub read: unsafe extern "C" fn(
        this: *mut CInStream,
        buf: *mut u8,
        size: u32,
        processed: *mut u32,
    ) -> HResult,
    /// Move to `offset` relative to a [`seek_origin`]; reports the new
    /// absolute position through `new_position` when non-null.
    pub seek: unsafe extern "C" fn(
        this: *mut CInStream,
        offset: i64,
        origin: u32,
        new_position: *mut u64,
    ) -> HResult,
    pub get_size:
        unsafe extern "C" fn(this: *mut CInStream, size: *mut u64) -> HResult,
}

/// Host-implemented sequential output stream.
#[repr(C)]
pub struct COutStream {
    /// Write at most `size` bytes. May consume fewer than `size`;
    /// callers loop on `*processed`.
    pub write: unsafe extern "C" fn(
        this: *mut COutStream,
        data: *const u8,
        size: u32,
        processed: *mut u32,
    ) -> HResult,
}

/// Callbacks available to the module while probing/opening a container.
#[repr(C)]
pub struct COpenCallbacks {
    /// Copy the password as UTF-16 code units into `buf` (capacity in
    /// units) and store the unit count in `len`. Returns
    /// [`rc::E_NO_PASSWORD`] when the host has none.
    pub crypto_get_password: unsafe extern "C" fn(
        this: *mut COpenCallbacks,
        buf: *mut u16,
        capacity: u32,
        len: *mut u32,
    ) -> HResult,
}

/// Callbacks driving one extract call.
#[repr(C)]
pub struct CExtractCallbacks {
    /// Request the output stream for `index`. The host returns a null
    /// stream for any ask mode other than [`ask_mode::EXTRACT`].
    pub get_stream: unsafe extern "C" fn(
        this: *mut CExtractCallbacks,
        index: u32,
        ask: i32,
        stream: *mut *mut COutStream,
    ) -> HResult,
    /// Reports the per-entry outcome. Informational; the final result
    /// is the return value of `extract` itself.
    pub set_operation_result:
        unsafe extern "C" fn(this: *mut CExtractCallbacks, result: HResult) -> HResult,
    /// Same contract as [`COpenCallbacks::crypto_get_password`].
    pub crypto_get_password: unsafe extern "C" fn(
        this: *mut CExtractCallbacks,
        buf: *mut u16,
        capacity: u32,
        len: *mut u32,
    ) -> HResult,
}
