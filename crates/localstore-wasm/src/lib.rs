//! localstore browser bridge
//!
//! Exposes [`LocalStore`](localstore_core::LocalStore) to JavaScript through
//! wasm-bindgen, backed by IndexedDB and degrading to `localStorage`.
//!
//! # Error protocol
//!
//! Every rejected promise carries a JS `Error` whose message has the form
//! `"<Kind>: <message>"`, where `<Kind>` is [`ErrorKind::as_str`](localstore_core::ErrorKind::as_str)
//! (`DuplicateKeyError`, `ConstraintError`, `SchemaMismatch`, ...). Callers
//! branch on the prefix.
//!
//! # Usage from JavaScript
//!
//! ```js
//! const store = new LocalStore({
//!   name: "ContactLedgerDB",
//!   version: 1,
//!   stores: [{ name: "contacts", keyPath: "id", autoIncrement: true,
//!              indexes: [{ name: "companyId", field: "companyId" }] }],
//! });
//! await store.init();
//! const id = await store.add("contacts", { name: "Ada", companyId: 7 });
//! const rows = await store.getByIndex("contacts", "companyId", 7);
//! ```

use localstore_core::{EngineMode, StoreError, StoreResult};

#[cfg(target_arch = "wasm32")]
pub mod browser;

/// Format an error for the JS boundary: kind prefix, then the message.
pub fn error_message(err: &StoreError) -> String {
    format!("{}: {}", err.kind().as_str(), err)
}

/// Parse the optional mode argument (`"auto"`, `"primary-only"`, `"fallback-only"`).
pub fn parse_mode(mode: Option<&str>) -> StoreResult<EngineMode> {
    match mode {
        None => Ok(EngineMode::default()),
        Some(name) => serde_json::from_value(serde_json::Value::String(name.to_string()))
            .map_err(|_| StoreError::Config(format!("unknown engine mode '{}'", name))),
    }
}
