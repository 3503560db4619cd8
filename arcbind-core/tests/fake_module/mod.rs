//! An in-process codec module used by the integration tests.
//!
//! The module registers one method table and five formats over a toy
//! container layout, exercising every part of the discovery contract:
//! entries that must be skipped, single and multi signatures, formats
//! that share a signature, and a signature-less fallback.
//!
//! Container layout (the "store" format):
//!   magic[4] = "AB01" or "AB02"
//!   flags: u8 (bit 0: password required, password is "secret")
//!   count: u32 LE
//!   per entry:
//!     name_len: u16 LE, name: UTF-8 bytes
//!     is_dir: u8
//!     size: u64 LE, data: size bytes

use arcbind_core::abi::{
    ask_mode, entry_prop, format_prop, method_prop, prop_tag, rc, seek_origin, ArcHandler,
    ArcHandlerVTable, CExtractCallbacks, CInStream, ClassId, COpenCallbacks, EntryPoints,
    HResult, InterfaceId, RawProp, IID_IN_ARCHIVE,
};

pub const STORE_CLASS: ClassId = *b"fake:store:00001";
pub const BROKEN_CLASS: ClassId = *b"fake:broken:0001";
pub const BRTWO_CLASS: ClassId = *b"fake:brtwo:00001";
pub const FALLBACK_CLASS: ClassId = *b"fake:fallback:01";

pub const PASSWORD: &str = "secret";

/// Builds a container in the "store" layout.
pub fn store_archive(entries: &[(&str, bool, &[u8])], encrypted: bool) -> Vec<u8> {
    store_archive_with_magic(b"AB01", entries, encrypted)
}

pub fn store_archive_with_magic(
    magic: &[u8; 4],
    entries: &[(&str, bool, &[u8])],
    encrypted: bool,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(magic);
    out.push(u8::from(encrypted));
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (name, is_dir, data) in entries {
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(u8::from(*is_dir));
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

pub fn entry_points() -> EntryPoints {
    EntryPoints {
        get_number_of_methods,
        get_number_of_formats,
        get_method_property,
        get_handler_property,
        create_object,
    }
}

// ── Property cell helpers ───────────────────────────────────────────

unsafe extern "C" fn release_units(cell: *mut RawProp) {
    let cell = &mut *cell;
    let slice = std::slice::from_raw_parts_mut(cell.data as *mut u16, cell.len as usize);
    drop(Box::from_raw(slice));
}

unsafe fn put_str(cell: *mut RawProp, value: &str) {
    let units: Box<[u16]> = value.encode_utf16().collect();
    let len = units.len() as u32;
    let data = Box::into_raw(units) as *const u16;
    *cell = RawProp {
        tag: prop_tag::STR,
        data: data.cast(),
        len,
        release: Some(release_units),
        ..RawProp::empty()
    };
}

unsafe fn put_bytes_static(cell: *mut RawProp, value: &'static [u8]) {
    *cell = RawProp {
        tag: prop_tag::BYTES,
        data: value.as_ptr().cast(),
        len: value.len() as u32,
        ..RawProp::empty()
    };
}

unsafe fn put_bool(cell: *mut RawProp, value: bool) {
    *cell = RawProp {
        tag: prop_tag::BOOL,
        bool_val: u8::from(value),
        ..RawProp::empty()
    };
}

unsafe fn put_u32(cell: *mut RawProp, value: u32) {
    *cell = RawProp {
        tag: prop_tag::U32,
        u32_val: value,
        ..RawProp::empty()
    };
}

unsafe fn put_u64(cell: *mut RawProp, value: u64) {
    *cell = RawProp {
        tag: prop_tag::U64,
        u64_val: value,
        ..RawProp::empty()
    };
}

// ── Entry points ────────────────────────────────────────────────────

unsafe extern "C" fn get_number_of_methods(count: *mut u32) -> HResult {
    // Index 1 exists but errors on every property lookup; the host is
    // expected to skip it.
    *count = 2;
    rc::OK
}

unsafe extern "C" fn get_method_property(
    index: u32,
    prop_id: u32,
    value: *mut RawProp,
) -> HResult {
    if index != 0 {
        return rc::E_INTERNAL;
    }
    match prop_id {
        method_prop::NAME => put_str(value, "copy"),
        method_prop::DECODER => put_bytes_static(value, &STORE_CLASS),
        _ => *value = RawProp::empty(),
    }
    rc::OK
}

unsafe extern "C" fn get_number_of_formats(count: *mut u32) -> HResult {
    *count = 5;
    rc::OK
}

// "BR" runs, length-prefixed: one two-byte signature.
static BR_SIGNATURE: &[u8] = b"BR";
// Two four-byte signatures packed as a multi-signature blob.
static STORE_MULTI: &[u8] = &[4, b'A', b'B', b'0', b'1', 4, b'A', b'B', b'0', b'2'];

unsafe extern "C" fn get_handler_property(
    index: u32,
    prop_id: u32,
    value: *mut RawProp,
) -> HResult {
    *value = RawProp::empty();
    match (index, prop_id) {
        (0, format_prop::NAME) => put_str(value, "broken"),
        (0, format_prop::CLASS_ID) => put_bytes_static(value, &BROKEN_CLASS),
        (0, format_prop::SIGNATURE) => put_bytes_static(value, BR_SIGNATURE),

        (1, format_prop::NAME) => put_str(value, "brtwo"),
        (1, format_prop::CLASS_ID) => put_bytes_static(value, &BRTWO_CLASS),
        (1, format_prop::SIGNATURE) => put_bytes_static(value, BR_SIGNATURE),

        (2, format_prop::NAME) => put_str(value, "store"),
        (2, format_prop::CLASS_ID) => put_bytes_static(value, &STORE_CLASS),
        (2, format_prop::MULTI_SIGNATURE) => put_bytes_static(value, STORE_MULTI),
        (2, format_prop::SIGNATURE_OFFSET) => put_u32(value, 0),

        // Index 3 registers a name but no class id; the host must
        // drop the whole format.
        (3, format_prop::NAME) => put_str(value, "noclass"),

        (4, format_prop::NAME) => put_str(value, "fallback"),
        (4, format_prop::CLASS_ID) => put_bytes_static(value, &FALLBACK_CLASS),

        (0..=4, _) => {}
        _ => return rc::E_INVALID_ARG,
    }
    rc::OK
}

unsafe extern "C" fn create_object(
    class_id: *const ClassId,
    iface_id: *const InterfaceId,
    out: *mut *mut ArcHandler,
) -> HResult {
    if class_id.is_null() || iface_id.is_null() || out.is_null() {
        return rc::E_INVALID_ARG;
    }
    if *iface_id != IID_IN_ARCHIVE {
        return rc::E_INVALID_ARG;
    }
    let kind = match *class_id {
        STORE_CLASS => Kind::Store,
        BROKEN_CLASS => Kind::Broken,
        BRTWO_CLASS => Kind::BrTwo,
        FALLBACK_CLASS => Kind::Fallback,
        _ => return rc::E_INVALID_ARG,
    };
    let handler = Box::new(FakeHandler {
        base: ArcHandler { vtable: &VTABLE },
        kind,
        encrypted: false,
        entries: Vec::new(),
        open: false,
    });
    *out = Box::into_raw(handler).cast();
    rc::OK
}

// ── Handler objects ─────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    Store,
    Broken,
    BrTwo,
    Fallback,
}

struct Entry {
    name: String,
    is_dir: bool,
    data: Vec<u8>,
}

#[repr(C)]
struct FakeHandler {
    base: ArcHandler,
    kind: Kind,
    encrypted: bool,
    entries: Vec<Entry>,
    open: bool,
}

static VTABLE: ArcHandlerVTable = ArcHandlerVTable {
    open: handler_open,
    close: handler_close,
    get_entry_count: handler_get_entry_count,
    get_archive_property: handler_get_archive_property,
    get_entry_property: handler_get_entry_property,
    extract: handler_extract,
    release: handler_release,
};

unsafe fn state<'a>(this: *mut ArcHandler) -> &'a mut FakeHandler {
    &mut *(this as *mut FakeHandler)
}

unsafe fn read_all(stream: *mut CInStream) -> Result<Vec<u8>, HResult> {
    let mut size = 0u64;
    let code = ((*stream).get_size)(stream, &mut size);
    if code != rc::OK {
        return Err(code);
    }
    let code = ((*stream).seek)(stream, 0, seek_origin::SET, std::ptr::null_mut());
    if code != rc::OK {
        return Err(code);
    }

    let mut data = vec![0u8; size as usize];
    let mut filled = 0usize;
    while filled < data.len() {
        let mut processed = 0u32;
        let code = ((*stream).read)(
            stream,
            data[filled..].as_mut_ptr(),
            (data.len() - filled) as u32,
            &mut processed,
        );
        if code != rc::OK {
            return Err(code);
        }
        if processed == 0 {
            break;
        }
        filled += processed as usize;
    }
    data.truncate(filled);
    Ok(data)
}

/// Asks the host for a password and compares it to [`PASSWORD`].
unsafe fn check_open_password(callbacks: *mut COpenCallbacks) -> HResult {
    if callbacks.is_null() {
        return rc::E_NO_PASSWORD;
    }
    let mut buf = [0u16; 64];
    let mut len = 0u32;
    let code =
        ((*callbacks).crypto_get_password)(callbacks, buf.as_mut_ptr(), 64, &mut len);
    if code != rc::OK {
        return code;
    }
    let expected: Vec<u16> = PASSWORD.encode_utf16().collect();
    if buf[..len as usize] != expected[..] {
        return rc::E_WRONG_PASSWORD;
    }
    rc::OK
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.data.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }

    fn u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn parse_store(data: &[u8]) -> Option<(bool, Vec<Entry>)> {
    let mut r = Reader { data, pos: 0 };
    let magic = r.take(4)?;
    if magic != b"AB01" && magic != b"AB02" {
        return None;
    }
    let encrypted = r.u8()? & 1 != 0;
    let count = r.u32()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let name_len = r.u16()? as usize;
        let name = String::from_utf8(r.take(name_len)?.to_vec()).ok()?;
        let is_dir = r.u8()? != 0;
        let size = r.u64()? as usize;
        let data = r.take(size)?.to_vec();
        entries.push(Entry { name, is_dir, data });
    }
    Some((encrypted, entries))
}

unsafe extern "C" fn handler_open(
    this: *mut ArcHandler,
    stream: *mut CInStream,
    _max_check_start: u64,
    callbacks: *mut COpenCallbacks,
) -> HResult {
    let handler = state(this);
    match handler.kind {
        Kind::Broken => rc::E_DATA_ERROR,
        Kind::BrTwo => {
            let data = match read_all(stream) {
                Ok(data) => data,
                Err(code) => return code,
            };
            if !data.starts_with(b"BR") {
                return rc::E_DATA_ERROR;
            }
            handler.open = true;
            rc::OK
        }
        Kind::Fallback => {
            let data = match read_all(stream) {
                Ok(data) => data,
                Err(code) => return code,
            };
            if !data.starts_with(b"FB") {
                return rc::E_DATA_ERROR;
            }
            handler.open = true;
            rc::OK
        }
        Kind::Store => {
            let data = match read_all(stream) {
                Ok(data) => data,
                Err(code) => return code,
            };
            let Some((encrypted, entries)) = parse_store(&data) else {
                return rc::E_DATA_ERROR;
            };
            if encrypted {
                let code = check_open_password(callbacks);
                if code != rc::OK {
                    return code;
                }
            }
            handler.encrypted = encrypted;
            handler.entries = entries;
            handler.open = true;
            rc::OK
        }
    }
}

unsafe extern "C" fn handler_close(this: *mut ArcHandler) -> HResult {
    let handler = state(this);
    handler.open = false;
    handler.entries.clear();
    rc::OK
}

unsafe extern "C" fn handler_get_entry_count(
    this: *mut ArcHandler,
    count: *mut u32,
) -> HResult {
    let handler = state(this);
    if !handler.open {
        return rc::E_INTERNAL;
    }
    *count = handler.entries.len() as u32;
    rc::OK
}

unsafe extern "C" fn handler_get_archive_property(
    this: *mut ArcHandler,
    prop_id: u32,
    value: *mut RawProp,
) -> HResult {
    let handler = state(this);
    *value = RawProp::empty();
    match prop_id {
        entry_prop::NAME => put_str(value, "store-archive"),
        entry_prop::ENCRYPTED => put_bool(value, handler.encrypted),
        _ => {}
    }
    rc::OK
}

unsafe extern "C" fn handler_get_entry_property(
    this: *mut ArcHandler,
    index: u32,
    prop_id: u32,
    value: *mut RawProp,
) -> HResult {
    let handler = state(this);
    *value = RawProp::empty();
    let Some(entry) = handler.entries.get(index as usize) else {
        return rc::E_INVALID_ARG;
    };
    match prop_id {
        entry_prop::PATH => put_str(value, &entry.name),
        entry_prop::IS_DIR => put_bool(value, entry.is_dir),
        // Sizes below 4 GiB go out in the narrow encoding.
        entry_prop::SIZE => {
            if entry.data.len() < u32::MAX as usize {
                put_u32(value, entry.data.len() as u32)
            } else {
                put_u64(value, entry.data.len() as u64)
            }
        }
        entry_prop::PACKED_SIZE => put_u64(value, entry.data.len() as u64),
        _ => {}
    }
    rc::OK
}

unsafe extern "C" fn handler_extract(
    this: *mut ArcHandler,
    indices: *const u32,
    count: u32,
    test_mode: i32,
    callbacks: *mut CExtractCallbacks,
) -> HResult {
    let handler = state(this);
    if !handler.open || callbacks.is_null() {
        return rc::E_INTERNAL;
    }
    let indices = std::slice::from_raw_parts(indices, count as usize);
    let ask = if test_mode != 0 {
        ask_mode::TEST
    } else {
        ask_mode::EXTRACT
    };

    for &index in indices {
        let Some(entry) = handler.entries.get(index as usize) else {
            return rc::E_INVALID_ARG;
        };

        if handler.encrypted {
            let mut buf = [0u16; 64];
            let mut len = 0u32;
            let code = ((*callbacks).crypto_get_password)(
                callbacks,
                buf.as_mut_ptr(),
                64,
                &mut len,
            );
            if code != rc::OK {
                return code;
            }
            let expected: Vec<u16> = PASSWORD.encode_utf16().collect();
            if buf[..len as usize] != expected[..] {
                return rc::E_WRONG_PASSWORD;
            }
        }

        let mut stream = std::ptr::null_mut();
        let code = ((*callbacks).get_stream)(callbacks, index, ask, &mut stream);
        if code != rc::OK {
            return code;
        }
        if stream.is_null() {
            ((*callbacks).set_operation_result)(callbacks, rc::OK);
            continue;
        }

        let mut written = 0usize;
        while written < entry.data.len() {
            let mut processed = 0u32;
            let code = ((*stream).write)(
                stream,
                entry.data[written..].as_ptr(),
                (entry.data.len() - written) as u32,
                &mut processed,
            );
            if code != rc::OK {
                // Host fault codes go back out unchanged.
                return code;
            }
            if processed == 0 {
                return rc::E_DATA_ERROR;
            }
            written += processed as usize;
        }
        ((*callbacks).set_operation_result)(callbacks, rc::OK);
    }
    rc::OK
}

unsafe extern "C" fn handler_release(this: *mut ArcHandler) {
    drop(Box::from_raw(this as *mut FakeHandler));
}
