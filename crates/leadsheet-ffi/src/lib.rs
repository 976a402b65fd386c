//! C FFI bindings for leadsheet-core
//!
//! A C-compatible API over a working [`Session`], for GUI hosts written in C or C++.
//!
//! Functions returning `i32` use 0 for success, the error kind's code
//! (`FileNotFound` = 1 ... `WriteFailure` = 6) for core failures and -1 for
//! invalid arguments. The message of the last failure on the calling thread
//! is available from `ls_last_error`.

use leadsheet_core::{
    destination_exists, Aggregate, DedupeOptions, Error, ExportOptions, ExportTarget, KeyNormalization,
    LoadOptions, Session, SummaryRequest,
};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

pub const LS_OK: i32 = 0;
pub const LS_INVALID_ARGUMENT: i32 = -1;

/// Export the working table
pub const LS_EXPORT_CURRENT: i32 = 0;
/// Export the table as loaded
pub const LS_EXPORT_ORIGINAL: i32 = 1;
/// Export the last summary
pub const LS_EXPORT_SUMMARY: i32 = 2;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_last_error(message: impl Into<String>) {
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(message.into()));
}

fn fail(err: Error) -> i32 {
    set_last_error(err.to_string());
    err.kind().code()
}

fn invalid(message: &str) -> i32 {
    set_last_error(message);
    LS_INVALID_ARGUMENT
}

/// Borrow a C string as UTF-8, or `None` if null or invalid
unsafe fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

fn into_c_string(s: String) -> *mut c_char {
    CString::new(s)
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}

/// Opaque handle to a working session
pub struct LsSession {
    inner: Session,
}

/// Open a spreadsheet and start a session on it
///
/// # Safety
/// - `path` must be a valid C string
/// - Returns null on error; see `ls_last_error`
#[no_mangle]
pub unsafe extern "C" fn ls_session_open(path: *const c_char) -> *mut LsSession {
    let Some(path) = str_arg(path) else {
        invalid("path is null or not UTF-8");
        return ptr::null_mut();
    };

    match Session::open(path, LoadOptions::default()) {
        Ok(inner) => Box::into_raw(Box::new(LsSession { inner })),
        Err(e) => {
            fail(e);
            ptr::null_mut()
        }
    }
}

/// Start a session from pasted tab- or comma-delimited text
///
/// # Safety
/// - `text` must be a valid C string
/// - Returns null on error; see `ls_last_error`
#[no_mangle]
pub unsafe extern "C" fn ls_session_paste(text: *const c_char) -> *mut LsSession {
    let Some(text) = str_arg(text) else {
        invalid("text is null or not UTF-8");
        return ptr::null_mut();
    };

    match Session::paste(text) {
        Ok(inner) => Box::into_raw(Box::new(LsSession { inner })),
        Err(e) => {
            fail(e);
            ptr::null_mut()
        }
    }
}

/// Free a session
///
/// # Safety
/// - `session` must be a valid pointer returned by `ls_session_open`/`ls_session_paste` or null
#[no_mangle]
pub unsafe extern "C" fn ls_session_free(session: *mut LsSession) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Replace the session's table with another file
///
/// On failure the session keeps its current table.
///
/// # Safety
/// - `session` must be a valid session pointer
/// - `path` must be a valid C string
#[no_mangle]
pub unsafe extern "C" fn ls_session_load(session: *mut LsSession, path: *const c_char) -> i32 {
    if session.is_null() {
        return invalid("session is null");
    }
    let Some(path) = str_arg(path) else {
        return invalid("path is null or not UTF-8");
    };

    match (*session).inner.load(path) {
        Ok(_) => LS_OK,
        Err(e) => fail(e),
    }
}

/// Get the row count of the working table
///
/// # Safety
/// - `session` must be a valid session pointer or null
#[no_mangle]
pub unsafe extern "C" fn ls_table_row_count(session: *const LsSession) -> usize {
    if session.is_null() {
        return 0;
    }
    (*session).inner.table().row_count()
}

/// Get the column count of the working table
///
/// # Safety
/// - `session` must be a valid session pointer or null
#[no_mangle]
pub unsafe extern "C" fn ls_table_col_count(session: *const LsSession) -> usize {
    if session.is_null() {
        return 0;
    }
    (*session).inner.table().column_count()
}

/// Get a column name by index
///
/// # Safety
/// - `session` must be a valid session pointer
/// - Returns null if index is out of bounds
/// - Caller must free the returned string with `ls_free_string`
#[no_mangle]
pub unsafe extern "C" fn ls_table_col_name(session: *const LsSession, index: usize) -> *mut c_char {
    if session.is_null() {
        return ptr::null_mut();
    }

    (*session)
        .inner
        .table()
        .columns
        .get(index)
        .map(|c| into_c_string(c.name.clone()))
        .unwrap_or(ptr::null_mut())
}

/// Get a cell value as a string (empty for missing cells)
///
/// # Safety
/// - `session` must be a valid session pointer
/// - Returns null if row or col is out of bounds
/// - Caller must free the returned string with `ls_free_string`
#[no_mangle]
pub unsafe extern "C" fn ls_table_cell(session: *const LsSession, row: usize, col: usize) -> *mut c_char {
    if session.is_null() {
        return ptr::null_mut();
    }

    (*session)
        .inner
        .table()
        .rows
        .get(row)
        .and_then(|r| r.get(col))
        .map(|c| into_c_string(c.to_string_value()))
        .unwrap_or(ptr::null_mut())
}

/// Remove duplicate rows from the working table
///
/// `keys_json` is a JSON array of column names; null or `[]` means every column.
/// The number of removed rows is stored in `removed` when it is not null.
///
/// # Safety
/// - `session` must be a valid session pointer
/// - `keys_json` must be a valid C string or null
/// - `removed` must be a valid pointer to a `usize` or null
#[no_mangle]
pub unsafe extern "C" fn ls_session_dedupe(
    session: *mut LsSession,
    keys_json: *const c_char,
    trim: bool,
    case_insensitive: bool,
    removed: *mut usize,
) -> i32 {
    if session.is_null() {
        return invalid("session is null");
    }

    let keys: Vec<String> = if keys_json.is_null() {
        Vec::new()
    } else {
        let parsed = str_arg(keys_json).and_then(|s| serde_json::from_str(s).ok());
        match parsed {
            Some(keys) => keys,
            None => return invalid("keys_json must be a JSON array of column names"),
        }
    };

    let options = DedupeOptions {
        keys,
        normalize: KeyNormalization {
            trim,
            case_insensitive,
        },
    };

    match (*session).inner.dedupe(&options) {
        Ok(n) => {
            if !removed.is_null() {
                *removed = n;
            }
            LS_OK
        }
        Err(e) => fail(e),
    }
}

/// Summarize the working table and return the summary as JSON
///
/// `aggregate` is `count`, `sum` or `mean`; `value_column` may be null for `count`.
///
/// # Safety
/// - `session` must be a valid session pointer
/// - `group_by` and `aggregate` must be valid C strings; `value_column` a valid C string or null
/// - Returns null on error; see `ls_last_error`
/// - Caller must free the returned string with `ls_free_string`
#[no_mangle]
pub unsafe extern "C" fn ls_session_summarize(
    session: *mut LsSession,
    group_by: *const c_char,
    value_column: *const c_char,
    aggregate: *const c_char,
) -> *mut c_char {
    if session.is_null() {
        invalid("session is null");
        return ptr::null_mut();
    }
    let (Some(group_by), Some(aggregate)) = (str_arg(group_by), str_arg(aggregate)) else {
        invalid("group_by and aggregate must be valid strings");
        return ptr::null_mut();
    };

    let aggregate = match aggregate.parse::<Aggregate>() {
        Ok(a) => a,
        Err(e) => {
            fail(e);
            return ptr::null_mut();
        }
    };
    let request = SummaryRequest {
        group_by: group_by.to_string(),
        value_column: str_arg(value_column).map(str::to_string),
        aggregate,
        numbers: Default::default(),
    };

    match (*session).inner.summarize(&request) {
        Ok(summary) => match serde_json::to_string(summary) {
            Ok(json) => into_c_string(json),
            Err(e) => {
                set_last_error(e.to_string());
                ptr::null_mut()
            }
        },
        Err(e) => {
            fail(e);
            ptr::null_mut()
        }
    }
}

/// Check whether an export destination already exists
///
/// # Safety
/// - `path` must be a valid C string or null
#[no_mangle]
pub unsafe extern "C" fn ls_destination_exists(path: *const c_char) -> bool {
    str_arg(path).is_some_and(destination_exists)
}

/// Export one of the session's tables
///
/// `target` is one of `LS_EXPORT_CURRENT`, `LS_EXPORT_ORIGINAL`, `LS_EXPORT_SUMMARY`.
/// An existing destination is only replaced when `overwrite` is true.
///
/// # Safety
/// - `session` must be a valid session pointer
/// - `path` must be a valid C string
#[no_mangle]
pub unsafe extern "C" fn ls_session_export(
    session: *mut LsSession,
    target: i32,
    path: *const c_char,
    overwrite: bool,
) -> i32 {
    if session.is_null() {
        return invalid("session is null");
    }
    let Some(path) = str_arg(path) else {
        return invalid("path is null or not UTF-8");
    };
    let target = match target {
        LS_EXPORT_CURRENT => ExportTarget::Current,
        LS_EXPORT_ORIGINAL => ExportTarget::Original,
        LS_EXPORT_SUMMARY => ExportTarget::Summary,
        _ => return invalid("unknown export target"),
    };

    let options = ExportOptions {
        overwrite,
        ..ExportOptions::default()
    };
    match (*session).inner.export(target, path, &options) {
        Ok(_) => LS_OK,
        Err(e) => fail(e),
    }
}

/// Undo the last transform; returns false when there is nothing to undo
///
/// # Safety
/// - `session` must be a valid session pointer or null
#[no_mangle]
pub unsafe extern "C" fn ls_session_undo(session: *mut LsSession) -> bool {
    if session.is_null() {
        return false;
    }
    (*session).inner.undo()
}

/// Message of the last failure on this thread, or null if none
///
/// # Safety
/// - Caller must free the returned string with `ls_free_string`
#[no_mangle]
pub unsafe extern "C" fn ls_last_error() -> *mut c_char {
    LAST_ERROR
        .with(|e| e.borrow().clone())
        .map(into_c_string)
        .unwrap_or(ptr::null_mut())
}

/// Free a string returned by other FFI functions
///
/// # Safety
/// - `s` must be a valid pointer returned by a ls_* function or null
#[no_mangle]
pub unsafe extern "C" fn ls_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
