//! Mention Core Library
//!
//! Mention handling for the text inputs of tickets, tasks, atas, CRM leads
//! and HR workflows:
//! - Detection of the `@mention` being typed under the caret
//! - Conversion of `@DisplayName` to canonical `@[id]` and back
//! - Collaborator directory cache and popup suggestions
//! - Change notifications for an input's active mention
//!
//! The C ABI below exchanges JSON strings so any UI shell can call in.

pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod mentions;

pub use config::{CaretPolicy, DirectoryConfig, EngineConfig, Freshness};
pub use directory::{
    mention_map_from, suggest, CachedDirectory, Collaborator, Directory, StaticDirectory,
};
pub use error::MentionError;
pub use events::{MentionEvent, MentionTracker, Subscription};
pub use mentions::{
    convert_ids_to_names, convert_names_to_ids, detect_mention_state, extract_mention_ids,
    is_valid_mention_id, try_detect_mention_state, MentionMap, MentionState,
};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use tracing::warn;

#[derive(Deserialize)]
struct DetectRequest {
    text: String,
    #[serde(default)]
    caret: Option<usize>,
    #[serde(default)]
    policy: CaretPolicy,
}

#[derive(Deserialize)]
struct MentionPayload {
    display_name: String,
    id: String,
}

#[derive(Deserialize)]
struct ConvertRequest {
    text: String,
    /// Array so the caller's order is kept
    #[serde(default)]
    mentions: Vec<MentionPayload>,
}

fn parse_request<T: DeserializeOwned>(request: &str) -> Result<T, MentionError> {
    serde_json::from_str(request).map_err(|e| {
        warn!(error = %e, "invalid request payload");
        MentionError::Validation(e.to_string())
    })
}

fn respond(result: Result<Value, MentionError>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(e) => json!({ "ok": false, "error": e.to_string() }).to_string(),
    }
}

/// Detect the active mention.
///
/// Request: `{"text": "oi @gus", "caret": 7, "policy": "clamp"}` (`caret` and
/// `policy` optional). Response: `{"ok": true, "state": {...} | null}`.
pub fn detect_json(request: &str) -> String {
    respond(parse_request::<DetectRequest>(request).and_then(|req| {
        let state = match req.policy {
            CaretPolicy::Clamp => detect_mention_state(&req.text, req.caret),
            CaretPolicy::Strict => try_detect_mention_state(&req.text, req.caret)?,
        };
        Ok(json!({ "ok": true, "state": state }))
    }))
}

/// Convert display names to ids.
///
/// Request: `{"text": "...", "mentions": [{"display_name": "...", "id": "..."}]}`.
/// Response: `{"ok": true, "text": "...", "ids": [...]}` where `ids` lists the
/// canonical mentions present in the converted text. An id that cannot be
/// written as `@[id]` (empty, whitespace, `]`) rejects the whole request.
pub fn convert_json(request: &str) -> String {
    respond(parse_request::<ConvertRequest>(request).and_then(|req| {
        if let Some(bad) = req.mentions.iter().find(|m| !is_valid_mention_id(&m.id)) {
            warn!(name = %bad.display_name, id = %bad.id, "invalid mention id");
            return Err(MentionError::Validation(format!(
                "mention id {:?} for {:?} cannot be used in @[id]",
                bad.id, bad.display_name
            )));
        }
        let map: MentionMap = req
            .mentions
            .into_iter()
            .map(|m| (m.display_name, m.id))
            .collect();
        let text = convert_names_to_ids(&req.text, &map);
        let ids = extract_mention_ids(&text);
        Ok(json!({ "ok": true, "text": text, "ids": ids }))
    }))
}

/// Read a C string handed over by the caller.
fn read_c_str<'a>(ptr: *const c_char) -> Result<&'a str, MentionError> {
    if ptr.is_null() {
        return Err(MentionError::Validation("null request".to_string()));
    }
    let c_str = unsafe { CStr::from_ptr(ptr) };
    c_str
        .to_str()
        .map_err(|e| MentionError::Validation(format!("request is not UTF-8: {}", e)))
}

fn into_raw(response: String) -> *mut c_char {
    // serde_json escapes NUL, so this only fails on a broken invariant
    CString::new(response)
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

fn call_json(request: *const c_char, handler: fn(&str) -> String) -> *mut c_char {
    let response = match read_c_str(request) {
        Ok(request) => handler(request),
        Err(e) => respond(Err(e)),
    };
    into_raw(response)
}

/// C entry point for [`detect_json`].
///
/// `request` must be null or a valid NUL-terminated string. Free the result
/// with [`free_string`].
#[no_mangle]
pub extern "C" fn mention_detect_json(request: *const c_char) -> *mut c_char {
    call_json(request, detect_json)
}

/// C entry point for [`convert_json`].
///
/// `request` must be null or a valid NUL-terminated string. Free the result
/// with [`free_string`].
#[no_mangle]
pub extern "C" fn mention_convert_json(request: *const c_char) -> *mut c_char {
    call_json(request, convert_json)
}

/// Free a CString allocated by Rust
///
/// Call this from the UI shell after reading the string to prevent memory leaks
#[no_mangle]
pub extern "C" fn free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(response: &str) -> Value {
        serde_json::from_str(response).unwrap()
    }

    #[test]
    fn test_detect_json() {
        let out = parse(&detect_json(r#"{"text": "oi @gus", "caret": 7}"#));
        assert_eq!(out["ok"], true);
        assert_eq!(out["state"], json!({ "start": 3, "end": 7, "query": "gus" }));

        let out = parse(&detect_json(r#"{"text": "email@gus"}"#));
        assert_eq!(out["ok"], true);
        assert!(out["state"].is_null());
    }

    #[test]
    fn test_detect_json_strict_policy() {
        let out = parse(&detect_json(r#"{"text": "oi", "caret": 9, "policy": "strict"}"#));
        assert_eq!(out["ok"], false);
        assert!(out["error"].as_str().unwrap().contains("caret 9"));

        let out = parse(&detect_json(r#"{"text": "oi @a", "caret": 9}"#));
        assert_eq!(out["state"]["query"], "a");
    }

    #[test]
    fn test_convert_json_keeps_order_and_lists_ids() {
        let request = json!({
            "text": "@Ana e @Anabela, cc @A+B",
            "mentions": [
                { "display_name": "Ana", "id": "1" },
                { "display_name": "Anabela", "id": "2" },
                { "display_name": "A+B", "id": "3" },
            ]
        });
        let out = parse(&convert_json(&request.to_string()));
        assert_eq!(out["ok"], true);
        // "@Anabela," has no trailing boundary
        assert_eq!(out["text"], "@[1] e @Anabela, cc @[3]");
        assert_eq!(out["ids"], json!(["1", "3"]));
    }

    #[test]
    fn test_convert_json_rejects_ids_unfit_for_canonical_form() {
        let request = json!({
            "text": "oi @Ana",
            "mentions": [{ "display_name": "Ana", "id": "id 1" }]
        });
        let out = parse(&convert_json(&request.to_string()));
        assert_eq!(out["ok"], false);
        assert!(out["error"].as_str().unwrap().starts_with("invalid payload"));

        let request = json!({
            "text": "oi @Ana",
            "mentions": [{ "display_name": "Ana", "id": "a]b" }]
        });
        assert_eq!(parse(&convert_json(&request.to_string()))["ok"], false);
    }

    #[test]
    fn test_convert_json_ids_match_converted_text() {
        let request = json!({
            "text": "@Ana, @Bia ok",
            "mentions": [
                { "display_name": "Ana", "id": "1" },
                { "display_name": "Bia", "id": "2" },
            ]
        });
        let out = parse(&convert_json(&request.to_string()));
        assert_eq!(out["text"], "@Ana, @[2] ok");
        assert_eq!(out["ids"], json!(["2"]));
    }

    #[test]
    fn test_invalid_payloads_are_validation_errors() {
        let out = parse(&convert_json(r#"{"mentions": []}"#));
        assert_eq!(out["ok"], false);
        assert!(out["error"].as_str().unwrap().starts_with("invalid payload"));

        let out = parse(&detect_json("not json"));
        assert_eq!(out["ok"], false);

        let out = parse(&detect_json(r#"{"text": "x", "policy": "wrap"}"#));
        assert_eq!(out["ok"], false);
    }

    #[test]
    fn test_ffi_roundtrip() {
        let request = CString::new(r#"{"text": "oi @gus"}"#).unwrap();
        let result = mention_detect_json(request.as_ptr());
        assert!(!result.is_null());

        let c_str = unsafe { CStr::from_ptr(result) };
        let out = parse(c_str.to_str().unwrap());
        assert_eq!(out["state"]["start"], 3);

        free_string(result);
    }

    #[test]
    fn test_ffi_null_request() {
        let result = mention_convert_json(ptr::null());
        let c_str = unsafe { CStr::from_ptr(result) };
        let out = parse(c_str.to_str().unwrap());
        assert_eq!(out["ok"], false);
        assert!(out["error"].as_str().unwrap().contains("null request"));
        free_string(result);
    }
}
