//! Codec module registry.
//!
//! Loads the foreign codec module, resolves its entry points and
//! builds the in-memory method and format tables. Loading is
//! all-or-nothing: if any entry point is missing the module handle is
//! dropped (unloading the library) and nothing of the attempt remains
//! visible. The tables are immutable after a successful load and may
//! be read concurrently without locking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::abi::{
    self, format_prop, method_prop, rc, ArcHandler, ArcHandlerVTable, CExtractCallbacks,
    CInStream, ClassId, COpenCallbacks, EntryPoints, GetNumberFn, GetPropertyFn,
    CreateObjectFn, HResult, RawProp,
};
use crate::error::{Error, Result};
use crate::property::PropValue;

/// One compression method registered by the module.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: Option<String>,
    pub decoder: Option<ClassId>,
    pub encoder: Option<ClassId>,
}

/// One container format registered by the module.
#[derive(Debug, Clone)]
pub struct Format {
    pub class_id: ClassId,
    pub name: Option<String>,
    pub signature_offset: u32,
    /// Byte signatures at `signature_offset`. Empty means the format
    /// cannot be matched by sniffing and is only tried as a fallback.
    pub signatures: Vec<Vec<u8>>,
}

/// Process-wide registry of one loaded codec module.
pub struct CodecRegistry {
    // Keeps the shared library mapped; the entry-point fn pointers
    // below stay valid only while this handle lives.
    _module: Option<libloading::Library>,
    entry: EntryPoints,
    methods: Vec<Method>,
    formats: Vec<Format>,
}

static GLOBAL: Mutex<Option<Arc<CodecRegistry>>> = Mutex::new(None);

impl CodecRegistry {
    /// Loads a codec module from `path` and builds its tables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let module = unsafe { libloading::Library::new(path) }.map_err(|e| {
            Error::ModuleLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let entry = resolve_entry_points(&module)?;
        let mut registry = CodecRegistry {
            _module: Some(module),
            entry,
            methods: Vec::new(),
            formats: Vec::new(),
        };
        registry.load_tables()?;
        Ok(registry)
    }

    /// Builds a registry over entry points the host already holds,
    /// e.g. a statically linked codec module.
    pub fn from_entry_points(entry: EntryPoints) -> Result<Self> {
        let mut registry = CodecRegistry {
            _module: None,
            entry,
            methods: Vec::new(),
            formats: Vec::new(),
        };
        registry.load_tables()?;
        Ok(registry)
    }

    /// Initializes the process-wide registry. Idempotent: after the
    /// first success every later call returns the same registry
    /// without touching the module again. A failed attempt leaves the
    /// slot empty so a retry with a different path is possible.
    pub fn initialize(path: impl AsRef<Path>) -> Result<Arc<CodecRegistry>> {
        initialize_in(&GLOBAL, || CodecRegistry::load(path))
    }

    /// The process-wide registry, if [`initialize`](Self::initialize)
    /// has succeeded.
    pub fn global() -> Option<Arc<CodecRegistry>> {
        GLOBAL.lock().ok()?.clone()
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    /// Creates a live handler for `class_id`.
    pub(crate) fn create_handler(&self, class_id: &ClassId) -> Result<HandlerRef> {
        let mut out: *mut ArcHandler = std::ptr::null_mut();
        let code =
            unsafe { (self.entry.create_object)(class_id, &abi::IID_IN_ARCHIVE, &mut out) };
        if code != rc::OK {
            return Err(Error::from_code(code));
        }
        if out.is_null() {
            return Err(Error::Internal);
        }
        Ok(unsafe { HandlerRef::from_raw(out) })
    }

    // ── Table loading ───────────────────────────────────────────────

    fn load_tables(&mut self) -> Result<()> {
        self.load_methods()?;
        self.load_formats()?;
        Ok(())
    }

    fn load_methods(&mut self) -> Result<()> {
        let mut count = 0u32;
        let code = unsafe { (self.entry.get_number_of_methods)(&mut count) };
        if code != rc::OK {
            return Err(Error::from_code(code));
        }

        for index in 0..count {
            // A method whose property lookup errors is skipped, not
            // fatal: the module may register coders we cannot name.
            let Ok(name) = get_string(self.entry.get_method_property, index, method_prop::NAME)
            else {
                continue;
            };
            let Ok(decoder) =
                get_class_id(self.entry.get_method_property, index, method_prop::DECODER)
            else {
                continue;
            };
            let Ok(encoder) =
                get_class_id(self.entry.get_method_property, index, method_prop::ENCODER)
            else {
                continue;
            };
            self.methods.push(Method {
                name,
                decoder,
                encoder,
            });
        }
        Ok(())
    }

    fn load_formats(&mut self) -> Result<()> {
        let mut count = 0u32;
        let code = unsafe { (self.entry.get_number_of_formats)(&mut count) };
        if code != rc::OK {
            return Err(Error::from_code(code));
        }

        let getter = self.entry.get_handler_property;
        for index in 0..count {
            // A class id is required; skip the whole format without one.
            let Ok(Some(class_id)) = get_class_id(getter, index, format_prop::CLASS_ID)
            else {
                continue;
            };
            let Ok(name) = get_string(getter, index, format_prop::NAME) else {
                continue;
            };
            let Ok(signature_offset) =
                get_u32(getter, index, format_prop::SIGNATURE_OFFSET)
            else {
                continue;
            };
            let Ok(single) = get_bytes(getter, index, format_prop::SIGNATURE) else {
                continue;
            };
            let Ok(multi) = get_bytes(getter, index, format_prop::MULTI_SIGNATURE) else {
                continue;
            };

            let mut signatures = Vec::new();
            if let Some(signature) = single {
                signatures.push(signature);
            }
            if let Some(blob) = multi {
                signatures.extend(unpack_multi_signature(&blob));
            }

            self.formats.push(Format {
                class_id,
                name,
                signature_offset: signature_offset.unwrap_or(0),
                signatures,
            });
        }
        Ok(())
    }
}

/// One-shot initialization over an explicit guard slot; split out so
/// the guard semantics are testable without loading a real module.
fn initialize_in(
    slot: &Mutex<Option<Arc<CodecRegistry>>>,
    loader: impl FnOnce() -> Result<CodecRegistry>,
) -> Result<Arc<CodecRegistry>> {
    let mut guard = slot.lock().map_err(|_| Error::Internal)?;
    if let Some(existing) = guard.as_ref() {
        return Ok(Arc::clone(existing));
    }
    let registry = Arc::new(loader()?);
    *guard = Some(Arc::clone(&registry));
    Ok(registry)
}

fn resolve_entry_points(module: &libloading::Library) -> Result<EntryPoints> {
    // All five or nothing; the caller drops the library on error.
    unsafe {
        let get_number_of_methods: GetNumberFn =
            *resolve(module, abi::symbol::GET_NUMBER_OF_METHODS, "GetNumberOfMethods")?;
        let get_number_of_formats: GetNumberFn =
            *resolve(module, abi::symbol::GET_NUMBER_OF_FORMATS, "GetNumberOfFormats")?;
        let get_method_property: GetPropertyFn =
            *resolve(module, abi::symbol::GET_METHOD_PROPERTY, "GetMethodProperty")?;
        let get_handler_property: GetPropertyFn =
            *resolve(module, abi::symbol::GET_HANDLER_PROPERTY, "GetHandlerProperty")?;
        let create_object: CreateObjectFn =
            *resolve(module, abi::symbol::CREATE_OBJECT, "CreateObject")?;
        Ok(EntryPoints {
            get_number_of_methods,
            get_number_of_formats,
            get_method_property,
            get_handler_property,
            create_object,
        })
    }
}

unsafe fn resolve<'lib, T>(
    module: &'lib libloading::Library,
    symbol: &[u8],
    name: &'static str,
) -> Result<libloading::Symbol<'lib, T>> {
    module
        .get(symbol)
        .map_err(|_| Error::MissingEntryPoint(name))
}

// ── Property helpers for table construction ─────────────────────────

fn get_prop(getter: GetPropertyFn, index: u32, prop_id: u32) -> Result<PropValue> {
    let mut cell = RawProp::empty();
    let code = unsafe { getter(index, prop_id, &mut cell) };
    if code != rc::OK {
        return Err(Error::from_code(code));
    }
    Ok(unsafe { PropValue::take_raw(cell) })
}

fn get_string(getter: GetPropertyFn, index: u32, prop_id: u32) -> Result<Option<String>> {
    match get_prop(getter, index, prop_id)? {
        PropValue::Empty => Ok(None),
        PropValue::Str(s) => Ok(Some(s)),
        _ => Err(Error::InconsistentPropertyType),
    }
}

fn get_u32(getter: GetPropertyFn, index: u32, prop_id: u32) -> Result<Option<u32>> {
    match get_prop(getter, index, prop_id)? {
        PropValue::Empty => Ok(None),
        PropValue::Int(v) => Ok(Some(v)),
        _ => Err(Error::InconsistentPropertyType),
    }
}

fn get_bytes(getter: GetPropertyFn, index: u32, prop_id: u32) -> Result<Option<Vec<u8>>> {
    match get_prop(getter, index, prop_id)? {
        PropValue::Empty => Ok(None),
        PropValue::Bytes(b) => Ok(Some(b)),
        _ => Err(Error::InconsistentPropertyType),
    }
}

fn get_class_id(
    getter: GetPropertyFn,
    index: u32,
    prop_id: u32,
) -> Result<Option<ClassId>> {
    match get_bytes(getter, index, prop_id)? {
        None => Ok(None),
        Some(bytes) => {
            let id: ClassId = bytes
                .try_into()
                .map_err(|_| Error::InconsistentPropertyType)?;
            Ok(Some(id))
        }
    }
}

/// Unpacks a multi-signature blob: a run of `len_byte` + `len_byte`
/// bytes, repeated until the blob is consumed. A length byte that
/// exceeds the remaining blob truncates the unpack silently.
fn unpack_multi_signature(blob: &[u8]) -> Vec<Vec<u8>> {
    let mut signatures = Vec::new();
    let mut rest = blob;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len > tail.len() {
            break;
        }
        signatures.push(tail[..len].to_vec());
        rest = &tail[len..];
    }
    signatures
}

// ── Live handler objects ────────────────────────────────────────────

/// Owning wrapper around a live foreign handler. Closes and releases
/// the object on drop; [`close`](HandlerRef::close) may be called
/// earlier to observe the close result.
pub(crate) struct HandlerRef {
    ptr: *mut ArcHandler,
    closed: bool,
}

impl HandlerRef {
    /// # Safety
    /// `ptr` must be a handler fresh out of `CreateObject`, not shared
    /// with any other owner.
    pub(crate) unsafe fn from_raw(ptr: *mut ArcHandler) -> Self {
        HandlerRef { ptr, closed: false }
    }

    fn vt(&self) -> &ArcHandlerVTable {
        unsafe { &*(*self.ptr).vtable }
    }

    pub(crate) fn open(
        &mut self,
        stream: *mut CInStream,
        max_check_start: u64,
        callbacks: *mut COpenCallbacks,
    ) -> HResult {
        unsafe { (self.vt().open)(self.ptr, stream, max_check_start, callbacks) }
    }

    pub(crate) fn close(&mut self) -> HResult {
        if self.closed {
            return rc::OK;
        }
        self.closed = true;
        unsafe { (self.vt().close)(self.ptr) }
    }

    pub(crate) fn get_entry_count(&mut self, count: &mut u32) -> HResult {
        unsafe { (self.vt().get_entry_count)(self.ptr, count) }
    }

    pub(crate) fn get_archive_property(
        &mut self,
        prop_id: u32,
        value: &mut RawProp,
    ) -> HResult {
        unsafe { (self.vt().get_archive_property)(self.ptr, prop_id, value) }
    }

    pub(crate) fn get_entry_property(
        &mut self,
        index: u32,
        prop_id: u32,
        value: &mut RawProp,
    ) -> HResult {
        unsafe { (self.vt().get_entry_property)(self.ptr, index, prop_id, value) }
    }

    pub(crate) fn extract(
        &mut self,
        indices: &[u32],
        test_mode: bool,
        callbacks: *mut CExtractCallbacks,
    ) -> HResult {
        unsafe {
            (self.vt().extract)(
                self.ptr,
                indices.as_ptr(),
                indices.len() as u32,
                i32::from(test_mode),
                callbacks,
            )
        }
    }
}

impl Drop for HandlerRef {
    fn drop(&mut self) {
        // Close is idempotent on our side; release ends the object.
        let _ = self.close();
        unsafe { (self.vt().release)(self.ptr) };
    }
}
