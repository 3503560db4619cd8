//! Format matching by signature sniffing.
//!
//! Formats with byte signatures are tried first: the signature bytes
//! are cheap to check and specific, so the expensive deep-open runs
//! only on candidates that already look right. Formats without any
//! signature are tried last, in table order, as fallbacks.

use crate::abi::{rc, seek_origin, CInStream, COpenCallbacks, HResult};
use crate::error::{Error, Result};
use crate::registry::{CodecRegistry, Format, HandlerRef};
use crate::stream::InStreamBridge;

/// How far a handler may scan while validating a candidate container.
const MAX_CHECK_START_POSITION: u64 = 1 << 22;

/// Open callbacks that answer password requests from an optional
/// host-supplied password, held as UTF-16 code units.
#[repr(C)]
pub(crate) struct OpenCallbackState {
    // First field; the module sees `*mut COpenCallbacks`.
    vtable: COpenCallbacks,
    password: Option<Vec<u16>>,
}

impl OpenCallbackState {
    pub(crate) fn new(password: Option<&str>) -> Box<Self> {
        Box::new(OpenCallbackState {
            vtable: COpenCallbacks {
                crypto_get_password: open_get_password,
            },
            password: password.map(|p| p.encode_utf16().collect()),
        })
    }

    pub(crate) fn as_c_callbacks(&mut self) -> *mut COpenCallbacks {
        &mut self.vtable
    }
}

pub(crate) unsafe extern "C" fn open_get_password(
    this: *mut COpenCallbacks,
    buf: *mut u16,
    capacity: u32,
    len: *mut u32,
) -> HResult {
    let state = &*(this as *const OpenCallbackState);
    copy_password(state.password.as_deref(), buf, capacity, len)
}

pub(crate) unsafe fn copy_password(
    password: Option<&[u16]>,
    buf: *mut u16,
    capacity: u32,
    len: *mut u32,
) -> HResult {
    let Some(units) = password else {
        return rc::E_NO_PASSWORD;
    };
    if units.len() > capacity as usize || buf.is_null() || len.is_null() {
        return rc::E_INVALID_ARG;
    }
    std::ptr::copy_nonoverlapping(units.as_ptr(), buf, units.len());
    *len = units.len() as u32;
    rc::OK
}

/// Determines which registered format can parse the stream and returns
/// the matched format index together with a live, opened handler.
pub(crate) fn match_format(
    registry: &CodecRegistry,
    bridge: &mut InStreamBridge,
    password: Option<&str>,
) -> Result<(usize, HandlerRef)> {
    let formats = registry.formats();
    let mut callbacks = OpenCallbackState::new(password);
    let mut sniffed = vec![false; formats.len()];
    // A candidate that rejected the stream over its password is worth
    // more than "unknown format" if nothing else opens: the host can
    // prompt and retry.
    let mut password_error = None;

    // Pass 1: formats with signatures, cheapest check first.
    for (index, format) in formats.iter().enumerate() {
        if format.signatures.is_empty() {
            continue;
        }
        sniffed[index] = true;

        for signature in &format.signatures {
            match sniff(bridge, format.signature_offset, signature) {
                Ok(true) => {}
                // Short reads and host faults during sniffing are
                // non-matches for this signature, not errors.
                Ok(false) | Err(_) => continue,
            }

            match try_open(registry, format, bridge, callbacks.as_c_callbacks()) {
                Ok(handler) => return Ok((index, handler)),
                Err(error) => {
                    if matches!(error, Error::WrongPassword(_)) {
                        password_error.get_or_insert(error);
                    }
                    // The deep validation rejected the stream. A
                    // signature match is necessary, not sufficient;
                    // give the remaining formats a chance instead of
                    // retrying this one's other signatures.
                    if let Some(name) = &format.name {
                        eprintln!(
                            "arcbind: signature matched format {name} but open failed, trying next format"
                        );
                    }
                    break;
                }
            }
        }
    }

    // Pass 2: signature-less fallbacks, in table order.
    for (index, format) in formats.iter().enumerate() {
        if sniffed[index] {
            continue;
        }
        match try_open(registry, format, bridge, callbacks.as_c_callbacks()) {
            Ok(handler) => return Ok((index, handler)),
            Err(error) => {
                if matches!(error, Error::WrongPassword(_)) {
                    password_error.get_or_insert(error);
                }
            }
        }
    }

    Err(password_error.unwrap_or(Error::UnknownFormat))
}

/// Reads `offset + signature.len()` bytes from the start of the stream
/// and compares the tail against the signature. EOF before enough
/// bytes is a clean non-match.
fn sniff(bridge: &mut InStreamBridge, offset: u32, signature: &[u8]) -> Result<bool> {
    if signature.is_empty() {
        return Ok(false);
    }
    let stream = bridge.as_c_stream();
    seek_to_start(stream)?;

    let want = offset as usize + signature.len();
    let mut bytes = vec![0u8; want];
    let read = read_fully(stream, &mut bytes)?;
    if read < want {
        return Ok(false);
    }
    Ok(&bytes[offset as usize..] == signature)
}

/// Instantiates and deep-opens a handler for one candidate format.
/// On failure the handler is closed and released before returning, so
/// the module is left clean for the next candidate.
fn try_open(
    registry: &CodecRegistry,
    format: &Format,
    bridge: &mut InStreamBridge,
    callbacks: *mut COpenCallbacks,
) -> Result<HandlerRef> {
    let mut handler = registry.create_handler(&format.class_id)?;

    let stream = bridge.as_c_stream();
    seek_to_start(stream)?;

    let code = handler.open(stream, MAX_CHECK_START_POSITION, callbacks);
    if code != rc::OK {
        // Dropping the handler closes and releases it.
        if let Some(fault) = bridge.take_fault() {
            return Err(Error::HostFault(fault));
        }
        return Err(Error::from_code(code));
    }
    Ok(handler)
}

fn seek_to_start(stream: *mut CInStream) -> Result<()> {
    let code =
        unsafe { ((*stream).seek)(stream, 0, seek_origin::SET, std::ptr::null_mut()) };
    if code != rc::OK {
        return Err(Error::from_code(code));
    }
    Ok(())
}

/// Reads until the buffer is full or the stream ends; returns the byte
/// count actually read.
fn read_fully(stream: *mut CInStream, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let mut processed = 0u32;
        let code = unsafe {
            ((*stream).read)(
                stream,
                buf[filled..].as_mut_ptr(),
                (buf.len() - filled) as u32,
                &mut processed,
            )
        };
        if code != rc::OK {
            return Err(Error::from_code(code));
        }
        if processed == 0 {
            break;
        }
        filled += processed as usize;
    }
    Ok(filled)
}
