//! Stream bridging between host I/O objects and the codec module.
//!
//! The module speaks the `CInStream`/`COutStream` contracts from
//! [`crate::abi`]; the host supplies [`InputSource`]/[`OutputSink`]
//! objects. Each bridge owns a fixed 4 KiB transfer buffer and is a
//! synchronous pass-through: it never holds more than one buffer's
//! worth of data between the two sides.
//!
//! Every host callback is wrapped at this boundary. A fault raised by
//! host code (an error return or a panic) is described, recorded on
//! the bridge, and reported to the module as the single code
//! [`rc::E_HOST_FAULT`]; it never unwinds through the module's frames.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::abi::{rc, seek_origin, CInStream, COutStream, HResult};

/// Size of a bridge's transfer buffer.
pub const TRANSFER_BUFFER_SIZE: usize = 4 * 1024;

/// A failure raised by host-side stream code. Carries a description
/// only; the bridge converts it to an error code at the boundary.
#[derive(Debug)]
pub struct HostFault(pub String);

impl HostFault {
    pub fn new(message: impl Into<String>) -> Self {
        HostFault(message.into())
    }
}

impl std::fmt::Display for HostFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<std::io::Error> for HostFault {
    fn from(err: std::io::Error) -> Self {
        HostFault(err.to_string())
    }
}

/// Host-supplied random-access byte source. The host object is the
/// single source of truth for position and size; the bridge never
/// caches either.
pub trait InputSource {
    /// Reads into `buf`, returning the byte count; 0 means end of
    /// stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HostFault>;
    /// Moves to an absolute position.
    fn seek(&mut self, pos: u64) -> Result<(), HostFault>;
    /// Current absolute position.
    fn tell(&mut self) -> Result<u64, HostFault>;
    /// Total length of the source.
    fn size(&mut self) -> Result<u64, HostFault>;
    /// Called once when the bridge is torn down.
    fn close(&mut self) -> Result<(), HostFault> {
        Ok(())
    }
}

/// Host-supplied sequential byte sink.
pub trait OutputSink {
    fn write(&mut self, buf: &[u8]) -> Result<(), HostFault>;
    /// Called once when the bridge is torn down.
    fn close(&mut self) -> Result<(), HostFault> {
        Ok(())
    }
}

/// Runs a host callback, converting a panic into a fault. This is the
/// "catch at this boundary" contract: nothing host-side may unwind
/// into the foreign module's call stack.
fn guard_host_call<T>(
    f: impl FnOnce() -> Result<T, HostFault>,
) -> Result<T, HostFault> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "host code panicked".to_string());
            Err(HostFault(format!("panic in host stream callback: {message}")))
        }
    }
}

// ── Inbound bridge ──────────────────────────────────────────────────

#[repr(C)]
struct InStreamState {
    // Must stay the first field: the module sees `*mut CInStream` and
    // the shims cast it back to the full state.
    vtable: CInStream,
    source: Box<dyn InputSource>,
    buffer: Box<[u8; TRANSFER_BUFFER_SIZE]>,
    last_fault: Option<String>,
}

impl InStreamState {
    fn note_fault(&mut self, fault: HostFault) -> HResult {
        eprintln!("arcbind: input stream fault: {fault}");
        self.last_fault = Some(fault.0);
        rc::E_HOST_FAULT
    }
}

unsafe extern "C" fn in_read(
    this: *mut CInStream,
    buf: *mut u8,
    size: u32,
    processed: *mut u32,
) -> HResult {
    let state = &mut *(this as *mut InStreamState);
    if !processed.is_null() {
        *processed = 0;
    }
    if size == 0 || buf.is_null() {
        return rc::OK;
    }

    // A single call never moves more than one transfer buffer.
    let want = (size as usize).min(TRANSFER_BUFFER_SIZE);
    let staging = &mut state.buffer[..want];
    match guard_host_call(|| state.source.read(staging)) {
        // Zero from the host is end-of-stream, not an error.
        Ok(0) => rc::OK,
        Ok(n) => {
            let n = n.min(want);
            std::ptr::copy_nonoverlapping(state.buffer.as_ptr(), buf, n);
            if !processed.is_null() {
                *processed = n as u32;
            }
            rc::OK
        }
        Err(fault) => state.note_fault(fault),
    }
}

unsafe extern "C" fn in_seek(
    this: *mut CInStream,
    offset: i64,
    origin: u32,
    new_position: *mut u64,
) -> HResult {
    let state = &mut *(this as *mut InStreamState);

    let base = match origin {
        seek_origin::SET => 0,
        seek_origin::CUR => match guard_host_call(|| state.source.tell()) {
            Ok(pos) => pos as i64,
            Err(fault) => return state.note_fault(fault),
        },
        seek_origin::END => match guard_host_call(|| state.source.size()) {
            Ok(size) => size as i64,
            Err(fault) => return state.note_fault(fault),
        },
        _ => return rc::E_INVALID_ARG,
    };

    let target = base + offset;
    if target < 0 {
        return rc::E_INVALID_ARG;
    }

    match guard_host_call(|| state.source.seek(target as u64)) {
        Ok(()) => {
            if !new_position.is_null() {
                *new_position = target as u64;
            }
            rc::OK
        }
        Err(fault) => state.note_fault(fault),
    }
}

unsafe extern "C" fn in_get_size(this: *mut CInStream, size: *mut u64) -> HResult {
    let state = &mut *(this as *mut InStreamState);
    match guard_host_call(|| state.source.size()) {
        Ok(total) => {
            if !size.is_null() {
                *size = total;
            }
            rc::OK
        }
        Err(fault) => state.note_fault(fault),
    }
}

/// Inbound adapter: exposes read/seek/size to the foreign module,
/// backed by a host [`InputSource`].
pub struct InStreamBridge {
    state: Box<InStreamState>,
}

impl InStreamBridge {
    pub fn new(source: Box<dyn InputSource>) -> Self {
        InStreamBridge {
            state: Box::new(InStreamState {
                vtable: CInStream {
                    read: in_read,
                    seek: in_seek,
                    get_size: in_get_size,
                },
                source,
                buffer: Box::new([0; TRANSFER_BUFFER_SIZE]),
                last_fault: None,
            }),
        }
    }

    /// Pointer handed to the foreign module. Valid while the bridge
    /// lives; the state is heap-pinned behind the box.
    pub(crate) fn as_c_stream(&mut self) -> *mut CInStream {
        &mut self.state.vtable
    }

    /// Takes the description of the most recent host fault, if a
    /// callback failed since the last call.
    pub(crate) fn take_fault(&mut self) -> Option<String> {
        self.state.last_fault.take()
    }
}

impl Drop for InStreamState {
    fn drop(&mut self) {
        // Faults during teardown are cleared, never propagated.
        if let Err(fault) = guard_host_call(|| self.source.close()) {
            eprintln!("arcbind: input stream close fault: {fault}");
        }
    }
}

// ── Outbound bridge ─────────────────────────────────────────────────

#[repr(C)]
struct OutStreamState {
    // First field; see InStreamState.
    vtable: COutStream,
    sink: Box<dyn OutputSink>,
    buffer: Box<[u8; TRANSFER_BUFFER_SIZE]>,
    last_fault: Option<String>,
}

unsafe extern "C" fn out_write(
    this: *mut COutStream,
    data: *const u8,
    size: u32,
    processed: *mut u32,
) -> HResult {
    let state = &mut *(this as *mut OutStreamState);
    if !processed.is_null() {
        *processed = 0;
    }
    if size == 0 || data.is_null() {
        return rc::OK;
    }

    // Clamp to one transfer buffer per call; the module loops.
    let chunk = (size as usize).min(TRANSFER_BUFFER_SIZE);
    std::ptr::copy_nonoverlapping(data, state.buffer.as_mut_ptr(), chunk);

    let staging = &state.buffer[..chunk];
    match guard_host_call(|| state.sink.write(staging)) {
        Ok(()) => {
            if !processed.is_null() {
                *processed = chunk as u32;
            }
            rc::OK
        }
        Err(fault) => {
            eprintln!("arcbind: output stream fault: {fault}");
            state.last_fault = Some(fault.0);
            rc::E_HOST_FAULT
        }
    }
}

/// Outbound adapter: exposes a sequential write to the foreign module,
/// backed by a host [`OutputSink`]. Dropping the bridge closes the
/// sink exactly once.
pub struct OutStreamBridge {
    state: Box<OutStreamState>,
}

impl OutStreamBridge {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        OutStreamBridge {
            state: Box::new(OutStreamState {
                vtable: COutStream { write: out_write },
                sink,
                buffer: Box::new([0; TRANSFER_BUFFER_SIZE]),
                last_fault: None,
            }),
        }
    }

    pub(crate) fn as_c_stream(&mut self) -> *mut COutStream {
        &mut self.state.vtable
    }

    pub(crate) fn take_fault(&mut self) -> Option<String> {
        self.state.last_fault.take()
    }
}

impl Drop for OutStreamState {
    fn drop(&mut self) {
        if let Err(fault) = guard_host_call(|| self.sink.close()) {
            eprintln!("arcbind: output stream close fault: {fault}");
        }
    }
}

// ── Provided sources and sinks ──────────────────────────────────────

/// Random-access source over a file.
pub struct FileSource {
    file: File,
}

impl FileSource {
    pub fn open(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(FileSource {
            file: File::open(path)?,
        })
    }
}

impl InputSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HostFault> {
        Ok(self.file.read(buf)?)
    }

    fn seek(&mut self, pos: u64) -> Result<(), HostFault> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64, HostFault> {
        Ok(self.file.stream_position()?)
    }

    fn size(&mut self) -> Result<u64, HostFault> {
        Ok(self.file.metadata().map_err(HostFault::from)?.len())
    }
}

/// Sequential sink over a file.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(FileSink {
            file: File::create(path)?,
        })
    }
}

impl OutputSink for FileSink {
    fn write(&mut self, buf: &[u8]) -> Result<(), HostFault> {
        self.file.write_all(buf)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), HostFault> {
        self.file.flush()?;
        Ok(())
    }
}

/// In-memory source over a byte buffer.
pub struct MemorySource {
    cursor: Cursor<Vec<u8>>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        MemorySource {
            cursor: Cursor::new(data),
        }
    }
}

impl InputSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HostFault> {
        Ok(self.cursor.read(buf)?)
    }

    fn seek(&mut self, pos: u64) -> Result<(), HostFault> {
        self.cursor.set_position(pos);
        Ok(())
    }

    fn tell(&mut self) -> Result<u64, HostFault> {
        Ok(self.cursor.position())
    }

    fn size(&mut self) -> Result<u64, HostFault> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

/// In-memory sink collecting written bytes.
#[derive(Default)]
pub struct MemorySink {
    data: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, buf: &[u8]) -> Result<(), HostFault> {
        self.data.extend_from_slice(buf);
        Ok(())
    }
}
