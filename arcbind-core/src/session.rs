//! Per-opened-archive session.
//!
//! An [`ArchiveSession`] pairs one live foreign handler with the name
//! of the format it was opened under. It owns the inbound stream
//! bridge for as long as the handler may call back into it, exposes
//! the typed property getters, and drives extraction through an
//! outbound bridge created per call.

use crate::abi::{ask_mode, rc, CExtractCallbacks, COutStream, HResult, RawProp};
use crate::error::{Error, Result};
use crate::matcher::{copy_password, match_format};
use crate::property::{PropType, PropValue};
use crate::registry::{CodecRegistry, HandlerRef};
use crate::stream::{InStreamBridge, InputSource, OutStreamBridge, OutputSink};

/// A live, opened archive. Single-owner: the host must not call it
/// from two threads at once.
pub struct ArchiveSession {
    // Declared before `bridge` so the handler is released while the
    // stream it may reference is still alive.
    handler: Option<HandlerRef>,
    format_name: Option<String>,
    bridge: InStreamBridge,
}

impl ArchiveSession {
    /// Opens an archive: bridges the host source, sniffs the format
    /// against the registry's tables and wraps the opened handler.
    pub fn open(
        registry: &CodecRegistry,
        source: Box<dyn InputSource>,
        password: Option<&str>,
    ) -> Result<ArchiveSession> {
        let mut bridge = InStreamBridge::new(source);
        let (format_index, handler) = match_format(registry, &mut bridge, password)?;
        let format_name = registry.formats()[format_index].name.clone();
        Ok(ArchiveSession {
            handler: Some(handler),
            format_name,
            bridge,
        })
    }

    /// The name the matched format registered, if it registered one.
    pub fn format_name(&self) -> Option<&str> {
        self.format_name.as_deref()
    }

    pub fn entry_count(&mut self) -> Result<u32> {
        let handler = self.handler.as_mut().ok_or(Error::SessionClosed)?;
        let mut count = 0u32;
        let code = handler.get_entry_count(&mut count);
        if code != rc::OK {
            return Err(self.map_code(code));
        }
        Ok(count)
    }

    // ── Property getters ────────────────────────────────────────────

    pub fn archive_property_type(&mut self, prop_id: u32) -> Result<PropType> {
        Ok(self.fetch_archive(prop_id)?.prop_type())
    }

    pub fn archive_bool_property(&mut self, prop_id: u32) -> Result<bool> {
        self.fetch_archive(prop_id)?.into_bool()
    }

    pub fn archive_int_property(&mut self, prop_id: u32) -> Result<u32> {
        self.fetch_archive(prop_id)?.into_int()
    }

    pub fn archive_long_property(&mut self, prop_id: u32) -> Result<u64> {
        self.fetch_archive(prop_id)?.into_long()
    }

    pub fn archive_string_property(&mut self, prop_id: u32) -> Result<String> {
        self.fetch_archive(prop_id)?.into_string()
    }

    pub fn entry_property_type(&mut self, index: u32, prop_id: u32) -> Result<PropType> {
        Ok(self.fetch_entry(index, prop_id)?.prop_type())
    }

    pub fn entry_bool_property(&mut self, index: u32, prop_id: u32) -> Result<bool> {
        self.fetch_entry(index, prop_id)?.into_bool()
    }

    pub fn entry_int_property(&mut self, index: u32, prop_id: u32) -> Result<u32> {
        self.fetch_entry(index, prop_id)?.into_int()
    }

    pub fn entry_long_property(&mut self, index: u32, prop_id: u32) -> Result<u64> {
        self.fetch_entry(index, prop_id)?.into_long()
    }

    pub fn entry_string_property(&mut self, index: u32, prop_id: u32) -> Result<String> {
        self.fetch_entry(index, prop_id)?.into_string()
    }

    // ── Extraction ──────────────────────────────────────────────────

    /// Extracts one entry into `sink`. The sink is closed exactly once
    /// whether extraction succeeds or fails; on failure the bytes
    /// already written stay in the sink — rollback is the host's
    /// concern.
    pub fn extract_entry(
        &mut self,
        index: u32,
        password: Option<&str>,
        sink: Box<dyn OutputSink>,
    ) -> Result<()> {
        let handler = self.handler.as_mut().ok_or(Error::SessionClosed)?;

        let mut out = OutStreamBridge::new(sink);
        let mut callbacks = ExtractCallbackState::new(&mut out, index, password);
        let indices = [index];
        let code = handler.extract(&indices, false, callbacks.as_c_callbacks());
        drop(callbacks);

        if code != rc::OK {
            let error = if code == rc::E_HOST_FAULT {
                out.take_fault()
                    .or_else(|| self.bridge.take_fault())
                    .map(Error::HostFault)
                    .unwrap_or_else(|| Error::from_code(code))
            } else {
                Error::from_code(code)
            };
            // Flush the host-side close before reporting.
            drop(out);
            return Err(error);
        }
        Ok(())
    }

    /// Closes the foreign handler. Every call after this one fails
    /// with [`Error::SessionClosed`] instead of touching a stale
    /// handler.
    pub fn close(&mut self) -> Result<()> {
        let mut handler = self.handler.take().ok_or(Error::SessionClosed)?;
        let code = handler.close();
        drop(handler);
        if code != rc::OK {
            return Err(self.map_code(code));
        }
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    fn fetch_archive(&mut self, prop_id: u32) -> Result<PropValue> {
        let handler = self.handler.as_mut().ok_or(Error::SessionClosed)?;
        let mut cell = RawProp::empty();
        let code = handler.get_archive_property(prop_id, &mut cell);
        if code != rc::OK {
            return Err(self.map_code(code));
        }
        Ok(unsafe { PropValue::take_raw(cell) })
    }

    fn fetch_entry(&mut self, index: u32, prop_id: u32) -> Result<PropValue> {
        let handler = self.handler.as_mut().ok_or(Error::SessionClosed)?;
        let mut cell = RawProp::empty();
        let code = handler.get_entry_property(index, prop_id, &mut cell);
        if code != rc::OK {
            return Err(self.map_code(code));
        }
        Ok(unsafe { PropValue::take_raw(cell) })
    }

    /// Maps a foreign code, preferring the recorded host fault
    /// description when the code says a host callback failed.
    fn map_code(&mut self, code: HResult) -> Error {
        if code == rc::E_HOST_FAULT {
            if let Some(fault) = self.bridge.take_fault() {
                return Error::HostFault(fault);
            }
        }
        Error::from_code(code)
    }
}

/// Extract callbacks for a single-entry extraction: hands the output
/// stream out once, for ask-mode extract only.
#[repr(C)]
struct ExtractCallbackState {
    // First field; the module sees `*mut CExtractCallbacks`.
    vtable: CExtractCallbacks,
    out_stream: *mut COutStream,
    index: u32,
    password: Option<Vec<u16>>,
}

impl ExtractCallbackState {
    fn new(out: &mut OutStreamBridge, index: u32, password: Option<&str>) -> Box<Self> {
        Box::new(ExtractCallbackState {
            vtable: CExtractCallbacks {
                get_stream: extract_get_stream,
                set_operation_result: extract_set_operation_result,
                crypto_get_password: extract_get_password,
            },
            out_stream: out.as_c_stream(),
            index,
            password: password.map(|p| p.encode_utf16().collect()),
        })
    }

    fn as_c_callbacks(&mut self) -> *mut CExtractCallbacks {
        &mut self.vtable
    }
}

unsafe extern "C" fn extract_get_stream(
    this: *mut CExtractCallbacks,
    index: u32,
    ask: i32,
    stream: *mut *mut COutStream,
) -> HResult {
    if stream.is_null() {
        return rc::E_INVALID_ARG;
    }
    let state = &*(this as *const ExtractCallbackState);
    // Test and skip modes get no stream; neither does any index other
    // than the one being extracted.
    if ask == ask_mode::EXTRACT && index == state.index {
        *stream = state.out_stream;
    } else {
        *stream = std::ptr::null_mut();
    }
    rc::OK
}

unsafe extern "C" fn extract_set_operation_result(
    _this: *mut CExtractCallbacks,
    _result: HResult,
) -> HResult {
    // Informational; the final outcome is the extract return code.
    rc::OK
}

unsafe extern "C" fn extract_get_password(
    this: *mut CExtractCallbacks,
    buf: *mut u16,
    capacity: u32,
    len: *mut u32,
) -> HResult {
    let state = &*(this as *const ExtractCallbackState);
    copy_password(state.password.as_deref(), buf, capacity, len)
}
