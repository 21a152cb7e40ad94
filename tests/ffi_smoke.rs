use std::ffi::{c_char, CString};
use std::ptr;

use anyhow::Result;
use tempfile::tempdir;

use pharmachain_core::error::FfiErrorCode;
use pharmachain_core::ffi::{
    pharma_free_string, pharma_get_product, pharma_get_product_owner, pharma_history,
    pharma_init_ledger, pharma_last_error, pharma_submit, pharma_verify_ledger, pharma_version,
};
use pharmachain_core::signing;

unsafe fn take_string(ptr: *mut c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let s = unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_str()
        .unwrap_or_default()
        .to_string();
    unsafe { pharma_free_string(ptr) };
    s
}

fn last_error() -> String {
    let len = unsafe { pharma_last_error(ptr::null_mut(), 0) };
    let mut buf = vec![0u8; len as usize];
    unsafe { pharma_last_error(buf.as_mut_ptr(), buf.len()) };
    buf.pop();
    String::from_utf8_lossy(&buf).into_owned()
}

fn cstr(p: &std::path::Path) -> Result<CString> {
    Ok(CString::new(p.to_string_lossy().to_string())?)
}

#[test]
fn ffi_version() {
    let mut out = ptr::null_mut();
    let code = unsafe { pharma_version(&mut out) };
    assert_eq!(code, 0);
    let json = unsafe { take_string(out) };
    assert!(json.contains("version"));
}

#[test]
fn ffi_lifecycle() -> Result<()> {
    let dir = tempdir()?;
    let keys = dir.path().join("keys");
    signing::keygen_p256(&keys, "admin")?;
    let maker_id = signing::keygen_p256(&keys, "maker")?;
    signing::keygen_p256(&keys, "hacker")?;

    let db = cstr(&dir.path().join("ffi.db"))?;
    let admin_key = cstr(&keys.join("admin.pem"))?;
    let maker_key = cstr(&keys.join("maker.pem"))?;
    let hacker_key = cstr(&keys.join("hacker.pem"))?;

    let mut out = ptr::null_mut();
    let code = unsafe { pharma_init_ledger(db.as_ptr(), admin_key.as_ptr(), ptr::null(), &mut out) };
    assert_eq!(code, 0, "{}", last_error());
    unsafe { take_string(out) };

    let expiry = pharmachain_core::util::now_unix() + 86_400;
    let register = CString::new(format!(
        r#"{{"op":"register_product","name":"Aspirin","batch_number":"BATCH-001","expiry_date":{expiry},"certificate_ref":"QmHash"}}"#
    ))?;
    let mut out = ptr::null_mut();
    let code = unsafe { pharma_submit(db.as_ptr(), maker_key.as_ptr(), register.as_ptr(), &mut out) };
    assert_eq!(code, 0, "{}", last_error());
    let receipt: serde_json::Value = serde_json::from_str(&unsafe { take_string(out) })?;
    assert_eq!(receipt["product_id"], 1);

    let scan = CString::new(r#"{"op":"scan_product","product_id":1,"status":"shipped"}"#)?;
    let mut out = ptr::null_mut();
    let code = unsafe { pharma_submit(db.as_ptr(), hacker_key.as_ptr(), scan.as_ptr(), &mut out) };
    assert_eq!(code, FfiErrorCode::Unauthorized as i32);
    assert!(last_error().contains("Only the owner can scan/update status"));

    let mut out = ptr::null_mut();
    let code = unsafe { pharma_submit(db.as_ptr(), maker_key.as_ptr(), scan.as_ptr(), &mut out) };
    assert_eq!(code, 0, "{}", last_error());
    unsafe { take_string(out) };

    let mut out = ptr::null_mut();
    assert_eq!(unsafe { pharma_get_product(db.as_ptr(), 1, &mut out) }, 0);
    let product: serde_json::Value = serde_json::from_str(&unsafe { take_string(out) })?;
    assert_eq!(product["status"], "shipped");
    assert_eq!(product["is_valid"], true);

    let mut out = ptr::null_mut();
    assert_eq!(unsafe { pharma_get_product_owner(db.as_ptr(), 1, &mut out) }, 0);
    let owner: serde_json::Value = serde_json::from_str(&unsafe { take_string(out) })?;
    assert_eq!(owner["owner"], maker_id.to_hex());

    let mut out = ptr::null_mut();
    assert_eq!(unsafe { pharma_history(db.as_ptr(), 1, &mut out) }, 0);
    let history: serde_json::Value = serde_json::from_str(&unsafe { take_string(out) })?;
    assert_eq!(history.as_array().map(Vec::len), Some(2));

    let mut out = ptr::null_mut();
    assert_eq!(unsafe { pharma_verify_ledger(db.as_ptr(), &mut out) }, 0);
    let status: serde_json::Value = serde_json::from_str(&unsafe { take_string(out) })?;
    assert_eq!(status["entry_count"], 5);
    Ok(())
}

#[test]
fn ffi_missing_product_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let keys = dir.path().join("keys");
    signing::keygen_p256(&keys, "admin")?;
    let db = cstr(&dir.path().join("ffi.db"))?;
    let admin_key = cstr(&keys.join("admin.pem"))?;

    let mut out = ptr::null_mut();
    assert_eq!(
        unsafe { pharma_init_ledger(db.as_ptr(), admin_key.as_ptr(), ptr::null(), &mut out) },
        0
    );
    unsafe { take_string(out) };

    let verify = CString::new(r#"{"op":"verify_product","product_id":9}"#)?;
    let mut out = ptr::null_mut();
    // The admin is not a regulator, so the role check fails first.
    let code = unsafe { pharma_submit(db.as_ptr(), admin_key.as_ptr(), verify.as_ptr(), &mut out) };
    assert_eq!(code, FfiErrorCode::Unauthorized as i32);

    let bad = CString::new("{not json")?;
    let code = unsafe { pharma_submit(db.as_ptr(), admin_key.as_ptr(), bad.as_ptr(), &mut out) };
    assert_eq!(code, FfiErrorCode::InvalidArgument as i32);
    Ok(())
}
