//! Minimal ABI stand-ins for unit tests.

use crate::abi::{
    rc, ArcHandler, ClassId, EntryPoints, HResult, InterfaceId, RawProp,
};

unsafe extern "C" fn zero_count(count: *mut u32) -> HResult {
    if !count.is_null() {
        *count = 0;
    }
    rc::OK
}

unsafe extern "C" fn no_property(_index: u32, _prop_id: u32, value: *mut RawProp) -> HResult {
    if !value.is_null() {
        *value = RawProp::empty();
    }
    rc::OK
}

unsafe extern "C" fn no_object(
    _class_id: *const ClassId,
    _iface_id: *const InterfaceId,
    _out: *mut *mut ArcHandler,
) -> HResult {
    rc::E_INTERNAL
}

/// Entry points for a module that registers nothing.
pub(crate) fn empty_entry_points() -> EntryPoints {
    EntryPoints {
        get_number_of_methods: zero_count,
        get_number_of_formats: zero_count,
        get_method_property: no_property,
        get_handler_property: no_property,
        create_object: no_object,
    }
}
