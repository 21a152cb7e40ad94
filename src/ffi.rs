//! C-ABI FFI exports (`pharmachain_core` cdylib).
//!
//! Every function returns an `i32` status code (0 = success, negative = error).
//! Output is returned as JSON via a `*mut *mut c_char` parameter; the caller
//! must free the string with [`pharma_free_string`].  Detailed error messages
//! (including revert reasons) are available via [`pharma_last_error`].
//!
//! # Safety
//! All functions that accept raw pointers are `unsafe`.  Callers must ensure
//! that string pointers are valid, null-terminated UTF-8.

#![allow(unsafe_code)]

use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::chain::Chain;
use crate::controller::LifecyclePolicy;
use crate::error::{ChainError, FfiErrorCode, ResultExt as _};
use crate::product::ProductId;
use crate::signing::{P256PemSigner, Signer as _};
use crate::tx::Call;
use crate::util;

// ---------------------------------------------------------------------------
// Global rate limiter (token bucket)
// ---------------------------------------------------------------------------

/// Maximum calls per second across all FFI functions.
const FFI_RATE_LIMIT_PER_SEC: u64 = 100;
/// Burst capacity.
const FFI_RATE_LIMIT_BURST: u64 = 200;

static TOKENS: AtomicU64 = AtomicU64::new(FFI_RATE_LIMIT_BURST);
static LAST_REFILL_MS: AtomicU64 = AtomicU64::new(0);

fn check_rate_limit() -> bool {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let last = LAST_REFILL_MS.load(Ordering::Relaxed);
    let elapsed_ms = now_ms.saturating_sub(last);
    if elapsed_ms > 0 {
        let refill = (elapsed_ms * FFI_RATE_LIMIT_PER_SEC) / 1000;
        if refill > 0 {
            LAST_REFILL_MS.store(now_ms, Ordering::Relaxed);
            let current = TOKENS.load(Ordering::Relaxed);
            let new_val = current.saturating_add(refill).min(FFI_RATE_LIMIT_BURST);
            TOKENS.store(new_val, Ordering::Relaxed);
        }
    }

    loop {
        let current = TOKENS.load(Ordering::Relaxed);
        if current == 0 {
            return false;
        }
        if TOKENS
            .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return true;
        }
    }
}

// ---------------------------------------------------------------------------
// Thread-local last error
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg)
            .unwrap_or_else(|_| c"unknown error (null byte in message)".to_owned());
    });
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

unsafe fn ptr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Required string argument, or `Validation("<name> is null")`.
unsafe fn required_arg<'a>(ptr: *const c_char, name: &str) -> crate::error::Result<&'a str> {
    unsafe { ptr_to_str(ptr) }.ok_or_else(|| ChainError::Validation(format!("{name} is null")))
}

fn write_out(out: *mut *mut c_char, val: String) {
    if !out.is_null() {
        unsafe { *out = CString::new(val).unwrap_or_default().into_raw() };
    }
}

/// Run `body`, catch panics, enforce rate limit, map errors to FFI codes.
fn ffi_run(
    out: *mut *mut c_char,
    body: impl FnOnce() -> crate::error::Result<String> + std::panic::UnwindSafe,
) -> c_int {
    if !check_rate_limit() {
        set_last_error("rate limit exceeded (too many FFI calls per second)");
        return FfiErrorCode::InternalError as c_int;
    }

    match std::panic::catch_unwind(body) {
        Ok(Ok(json)) => {
            write_out(out, json);
            FfiErrorCode::Ok as c_int
        }
        Ok(Err(e)) => {
            set_last_error(&e.to_string());
            FfiErrorCode::from(&e) as c_int
        }
        Err(_) => {
            set_last_error("internal panic");
            FfiErrorCode::InternalError as c_int
        }
    }
}

fn open_chain(db: &str) -> crate::error::Result<Chain> {
    let path = Path::new(db);
    util::validate_path(path, "db")?;
    Chain::open(path)
}

fn load_signer(key_pem: &str) -> crate::error::Result<P256PemSigner> {
    let path = Path::new(key_pem);
    util::validate_path(path, "key")?;
    P256PemSigner::from_key_pem(&util::canonicalize_if_exists(path, "key")?)
}

fn to_json<T: serde::Serialize>(value: &T) -> crate::error::Result<String> {
    serde_json::to_string(value).map_err(|e| ChainError::Other(format!("serialize output: {e}")))
}

// ---------------------------------------------------------------------------
// Public FFI functions
// ---------------------------------------------------------------------------

/// Retrieve the last error message.  Returns the number of bytes written
/// (including the null terminator).  If `buf` is null or `buf_len` is 0,
/// returns the required buffer size.
#[no_mangle]
pub unsafe extern "C" fn pharma_last_error(buf: *mut u8, buf_len: usize) -> c_int {
    LAST_ERROR.with(|e| {
        let msg = e.borrow();
        let bytes = msg.as_bytes_with_nul();
        if buf.is_null() || buf_len == 0 {
            return bytes.len() as c_int;
        }
        let copy_len = bytes.len().min(buf_len);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, copy_len) };
        if copy_len < bytes.len() {
            unsafe { *buf.add(copy_len - 1) = 0 };
        }
        copy_len as c_int
    })
}

/// Free a string previously returned by a `pharma_*` function.
#[no_mangle]
pub unsafe extern "C" fn pharma_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            drop(CString::from_raw(ptr));
        }
    }
}

/// Return the library version as a JSON string.
#[no_mangle]
pub unsafe extern "C" fn pharma_version(out_json: *mut *mut c_char) -> c_int {
    ffi_run(out_json, || {
        let info = serde_json::json!({
            "version": util::VERSION,
            "git_hash": util::GIT_HASH,
            "build_ts": util::BUILD_TS,
        });
        Ok(info.to_string())
    })
}

/// Generate a P-256 caller key `<name>.pem` and `<name>.id` in `out_dir`.
#[no_mangle]
pub unsafe extern "C" fn pharma_keygen(
    out_dir: *const c_char,
    name: *const c_char,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let dir = unsafe { required_arg(out_dir, "out_dir") }?;
        let name = unsafe { required_arg(name, "name") }?;
        util::validate_required(name, "key name")?;
        util::validate_path(Path::new(dir), "out_dir")?;
        let identity = crate::signing::keygen_p256(Path::new(dir), name)?;
        Ok(serde_json::json!({
            "identity": identity,
            "key_file": format!("{name}.pem"),
        })
        .to_string())
    })
}

/// Deploy a new ledger signed by `deployer_key_pem`.  `policy_json` may be
/// null for the default lifecycle policy.
#[no_mangle]
pub unsafe extern "C" fn pharma_init_ledger(
    db_path: *const c_char,
    deployer_key_pem: *const c_char,
    policy_json: *const c_char,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let db = unsafe { required_arg(db_path, "db_path") }?;
        let key = unsafe { required_arg(deployer_key_pem, "deployer_key_pem") }?;
        let policy: LifecyclePolicy = match unsafe { ptr_to_str(policy_json) } {
            Some(json) => serde_json::from_str(json).ctx_input("parse policy json")?,
            None => LifecyclePolicy::default(),
        };
        util::validate_path(Path::new(db), "db")?;
        let deployer = load_signer(key)?;
        let chain = Chain::create(Path::new(db), &deployer, policy)?;
        Ok(serde_json::json!({
            "ledger_id": chain.meta().ledger_id.to_string(),
            "created_at_utc": chain.meta().created_at_utc,
            "admin": deployer.identity(),
        })
        .to_string())
    })
}

/// Sign `call_json` (a tagged call such as `{"op":"scan_product",...}`) with
/// `key_pem` and submit it.  Returns the receipt.
#[no_mangle]
pub unsafe extern "C" fn pharma_submit(
    db_path: *const c_char,
    key_pem: *const c_char,
    call_json: *const c_char,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let db = unsafe { required_arg(db_path, "db_path") }?;
        let key = unsafe { required_arg(key_pem, "key_pem") }?;
        let json = unsafe { required_arg(call_json, "call_json") }?;
        let call: Call = serde_json::from_str(json).ctx_input("parse call json")?;
        let signer = load_signer(key)?;
        let mut chain = open_chain(db)?;
        to_json(&chain.execute(&signer, call)?)
    })
}

/// Product record; `is_valid` is false when the id is unknown.
#[no_mangle]
pub unsafe extern "C" fn pharma_get_product(
    db_path: *const c_char,
    product_id: ProductId,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let db = unsafe { required_arg(db_path, "db_path") }?;
        to_json(&open_chain(db)?.get_product(product_id))
    })
}

#[no_mangle]
pub unsafe extern "C" fn pharma_get_product_owner(
    db_path: *const c_char,
    product_id: ProductId,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let db = unsafe { required_arg(db_path, "db_path") }?;
        let owner = open_chain(db)?.get_product_owner(product_id);
        Ok(serde_json::json!({ "product_id": product_id, "owner": owner }).to_string())
    })
}

/// Ledger entries touching one product.
#[no_mangle]
pub unsafe extern "C" fn pharma_history(
    db_path: *const c_char,
    product_id: ProductId,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let db = unsafe { required_arg(db_path, "db_path") }?;
        to_json(&open_chain(db)?.history(product_id)?)
    })
}

/// Verify hash-chain integrity and signatures, and replay the ledger.
#[no_mangle]
pub unsafe extern "C" fn pharma_verify_ledger(
    db_path: *const c_char,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let db = unsafe { required_arg(db_path, "db_path") }?;
        let chain = open_chain(db)?;
        Ok(serde_json::json!({
            "status": "ok",
            "ledger_id": chain.meta().ledger_id.to_string(),
            "entry_count": chain.entries()?.len(),
            "product_count": chain.state().products().product_count(),
        })
        .to_string())
    })
}

/// Export ledger to a JSON backup file.
#[no_mangle]
pub unsafe extern "C" fn pharma_export_ledger(
    db_path: *const c_char,
    export_path: *const c_char,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let db = unsafe { required_arg(db_path, "db_path") }?;
        let out = unsafe { required_arg(export_path, "export_path") }?;
        util::validate_path(Path::new(out), "export_path")?;
        open_chain(db)?.export(Path::new(out))?;
        Ok(serde_json::json!({ "status": "ok", "export_path": out }).to_string())
    })
}

/// Import ledger from a JSON backup file into a new database.
#[no_mangle]
pub unsafe extern "C" fn pharma_import_ledger(
    json_path: *const c_char,
    db_path: *const c_char,
    out_json: *mut *mut c_char,
) -> c_int {
    ffi_run(out_json, || {
        let src = unsafe { required_arg(json_path, "json_path") }?;
        let db = unsafe { required_arg(db_path, "db_path") }?;
        util::validate_path(Path::new(db), "db")?;
        let chain = Chain::import(Path::new(src), Path::new(db))?;
        Ok(serde_json::json!({
            "status": "ok",
            "ledger_id": chain.meta().ledger_id.to_string(),
            "entry_count": chain.entries()?.len(),
        })
        .to_string())
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use tempfile::tempdir;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        if ptr.is_null() {
            return String::new();
        }
        let s = unsafe { CStr::from_ptr(ptr) }
            .to_str()
            .unwrap_or_default()
            .to_string();
        unsafe { pharma_free_string(ptr) };
        s
    }

    fn last_error() -> String {
        let mut buf = vec![0u8; 512];
        let n = unsafe { pharma_last_error(buf.as_mut_ptr(), buf.len()) };
        buf.truncate((n as usize).saturating_sub(1));
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn version_returns_json() {
        let mut out: *mut c_char = ptr::null_mut();
        let code = unsafe { pharma_version(&mut out) };
        assert_eq!(code, 0);
        let json = unsafe { take_string(out) };
        assert!(json.contains("version"));
    }

    #[test]
    fn init_ledger_rejects_null_path() {
        let mut out: *mut c_char = ptr::null_mut();
        let code = unsafe { pharma_init_ledger(ptr::null(), ptr::null(), ptr::null(), &mut out) };
        assert_eq!(code, FfiErrorCode::InvalidArgument as c_int);
        assert!(last_error().contains("db_path is null"));
    }

    #[test]
    fn unknown_product_reads_as_invalid() {
        let dir = tempdir().unwrap();
        let key_dir = dir.path().join("keys");
        crate::signing::keygen_p256(&key_dir, "admin").unwrap();
        let db = CString::new(dir.path().join("ffi.db").to_string_lossy().to_string()).unwrap();
        let key = CString::new(key_dir.join("admin.pem").to_string_lossy().to_string()).unwrap();

        let mut out: *mut c_char = ptr::null_mut();
        let code = unsafe { pharma_init_ledger(db.as_ptr(), key.as_ptr(), ptr::null(), &mut out) };
        assert_eq!(code, 0, "{}", last_error());
        unsafe { take_string(out) };

        let mut out: *mut c_char = ptr::null_mut();
        let code = unsafe { pharma_get_product(db.as_ptr(), 42, &mut out) };
        assert_eq!(code, 0);
        let v: serde_json::Value = serde_json::from_str(&unsafe { take_string(out) }).unwrap();
        assert_eq!(v["is_valid"], false);
    }
}
