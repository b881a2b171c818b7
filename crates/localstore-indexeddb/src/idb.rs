//! Low-level IndexedDB helpers using web-sys
//!
//! Wraps the callback-based IndexedDB API into Rust futures using
//! `wasm_bindgen_futures::JsFuture` and `js_sys::Promise`.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Promise;
use localstore_core::{DatabaseSchema, StoreError, StoreSchema};
use tracing::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    IdbDatabase, IdbFactory, IdbObjectStore, IdbOpenDbRequest, IdbRequest, IdbTransaction,
    IdbTransactionMode, IdbVersionChangeEvent,
};

use crate::error::{describe, IndexedDbError, Result};

type EventClosure = Closure<dyn FnMut(web_sys::Event)>;

/// Type alias for upgrade closure to reduce complexity
type UpgradeClosure = Rc<RefCell<Option<Closure<dyn FnMut(IdbVersionChangeEvent)>>>>;

/// Get the global IndexedDB factory.
pub fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| IndexedDbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(IndexedDbError::NotAvailable(
            "indexedDB is null/undefined".into(),
        ));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| IndexedDbError::NotAvailable("indexedDB is not IdbFactory".into()))
}

fn request_error(req: &IdbRequest) -> JsValue {
    match req.error() {
        Ok(Some(exception)) => exception.into(),
        _ => JsValue::from_str("unknown IDB error"),
    }
}

/// Convert an IdbRequest into a JS Promise that resolves with the request's result.
///
/// Rejects with the request's DOMException. For open requests, `blocked` also
/// rejects, so a stale connection in another tab cannot hang the open.
fn request_to_promise(req: &IdbRequest, open: Option<&IdbOpenDbRequest>) -> Promise {
    let req = req.clone();
    let open = open.cloned();

    Promise::new(&mut move |resolve, reject| {
        // Store closures in Rc<RefCell> to manage their lifetime without leaking
        let closures: Rc<RefCell<Vec<EventClosure>>> = Rc::new(RefCell::new(Vec::new()));

        let req_s = req.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            // Clean up all closures after success
            closures_for_success.borrow_mut().clear();
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req.clone();
        let reject_e = reject.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = reject_e.call1(&JsValue::UNDEFINED, &request_error(&req_e));
            closures_for_error.borrow_mut().clear();
        }) as Box<dyn FnMut(web_sys::Event)>);

        req.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        closures.borrow_mut().extend([on_success, on_error]);

        if let Some(open) = &open {
            let closures_for_blocked = closures.clone();
            let on_blocked = Closure::wrap(Box::new(move |_event: web_sys::Event| {
                let err = js_sys::Error::new("blocked by an open connection at an older version");
                err.set_name("BlockedError");
                let _ = reject.call1(&JsValue::UNDEFINED, &err);
                closures_for_blocked.borrow_mut().clear();
            }) as Box<dyn FnMut(web_sys::Event)>);
            open.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
            closures.borrow_mut().push(on_blocked);
        }
    })
}

/// Convert an IdbTransaction completion into a JS Promise.
fn transaction_to_promise(tx: &IdbTransaction) -> Promise {
    let tx = tx.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Vec<EventClosure>>> = Rc::new(RefCell::new(Vec::new()));

        let closures_for_complete = closures.clone();
        let on_complete = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = resolve.call0(&JsValue::UNDEFINED);
            // Clean up all closures after completion
            closures_for_complete.borrow_mut().clear();
        }) as Box<dyn FnMut(web_sys::Event)>);

        let tx_e = tx.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let err = tx_e
                .error()
                .map(JsValue::from)
                .unwrap_or_else(|| JsValue::from_str("transaction aborted"));
            let _ = reject.call1(&JsValue::UNDEFINED, &err);
            closures_for_error.borrow_mut().clear();
        }) as Box<dyn FnMut(web_sys::Event)>);

        tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        tx.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        tx.set_onabort(Some(on_error.as_ref().unchecked_ref()));
        closures.borrow_mut().extend([on_complete, on_error]);
    })
}

fn set_prop(target: &JsValue, name: &str, value: &JsValue) -> Result<()> {
    js_sys::Reflect::set(target, &JsValue::from_str(name), value)
        .map(|_| ())
        .map_err(|e| IndexedDbError::JsValue(describe(&e).1))
}

/// Create every declared store and index that does not exist yet.
fn upgrade(db: &IdbDatabase, tx: &IdbTransaction, schema: &DatabaseSchema) -> Result<()> {
    let existing = db.object_store_names();
    for store in &schema.stores {
        let object_store = if existing.contains(&store.name) {
            tx.object_store(&store.name)?
        } else {
            create_store(db, store)?
        };

        let indexes = object_store.index_names();
        for index in &store.indexes {
            if indexes.contains(&index.name) {
                continue;
            }
            let params = web_sys::IdbIndexParameters::new();
            set_prop(&params, "unique", &JsValue::from_bool(index.unique))?;
            object_store.create_index_with_str_and_optional_parameters(
                &index.name,
                &index.field,
                &params,
            )?;
        }
    }
    Ok(())
}

fn create_store(db: &IdbDatabase, store: &StoreSchema) -> Result<IdbObjectStore> {
    let params = web_sys::IdbObjectStoreParameters::new();
    set_prop(&params, "keyPath", &JsValue::from_str(&store.key_path))?;
    set_prop(&params, "autoIncrement", &JsValue::from_bool(store.auto_increment))?;
    Ok(db.create_object_store_with_optional_parameters(&store.name, &params)?)
}

/// Open (or create) a database at the schema's version, running the upgrade
/// handshake when the stored version is older.
///
/// Fails when IndexedDB is missing, the stored version is newer, another
/// connection blocks the upgrade, or the upgrade itself fails.
pub async fn open_database(schema: &DatabaseSchema) -> Result<IdbDatabase> {
    let factory = idb_factory()?;

    let open_req: IdbOpenDbRequest = factory
        .open_with_u32(&schema.name, schema.version)
        .map_err(|e| IndexedDbError::Open(describe(&e).1))?;

    // Store upgrade closure to manage its lifetime without leaking
    let upgrade_closure: UpgradeClosure = Rc::new(RefCell::new(None));
    let upgrade_failure: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));

    let upgrade_schema = schema.clone();
    let failure = upgrade_failure.clone();
    let req_u = open_req.clone();
    let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        let outcome = (|| -> Result<()> {
            let db: IdbDatabase = req_u.result()?.dyn_into().map_err(|_| {
                IndexedDbError::Open("upgrade result is not IdbDatabase".into())
            })?;
            let tx = req_u
                .transaction()
                .ok_or_else(|| IndexedDbError::Open("no versionchange transaction".into()))?;
            upgrade(&db, &tx, &upgrade_schema)
        })();

        if let Err(e) = outcome {
            *failure.borrow_mut() = Some(e.to_string());
            // Aborting fails the open request, which rejects the open promise.
            if let Some(tx) = req_u.transaction() {
                let _ = tx.abort();
            }
        } else {
            debug!(
                db = %upgrade_schema.name,
                from = event.old_version(),
                to = upgrade_schema.version,
                "⊔ indexeddb upgrade applied"
            );
        }
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    open_req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));

    // Store closure to keep it alive during the open request
    *upgrade_closure.borrow_mut() = Some(on_upgrade);

    // Await the open request via promise
    let open_promise = request_to_promise(open_req.unchecked_ref(), Some(&open_req));
    let result = wasm_bindgen_futures::JsFuture::from(open_promise).await;

    // Clean up upgrade closure now that open is complete
    *upgrade_closure.borrow_mut() = None;

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            let (name, message) = describe(&e);
            if let Some(reason) = upgrade_failure.borrow_mut().take() {
                return Err(IndexedDbError::Open(format!("upgrade failed: {}", reason)));
            }
            return Err(if name == "BlockedError" {
                IndexedDbError::Blocked(message)
            } else {
                IndexedDbError::Open(format!("{}: {}", name, message))
            });
        }
    };

    result
        .dyn_into::<IdbDatabase>()
        .map_err(|_| IndexedDbError::Open("result is not IdbDatabase".into()))
}

/// Start a transaction on one store.
///
/// A store the file does not have is a schema mismatch, not a transaction failure.
pub fn begin_transaction(
    db: &IdbDatabase,
    store: &str,
    mode: IdbTransactionMode,
) -> Result<(IdbTransaction, IdbObjectStore)> {
    if !db.object_store_names().contains(store) {
        return Err(StoreError::SchemaMismatch(format!(
            "store '{}' does not exist in IndexedDB database '{}'",
            store,
            db.name()
        ))
        .into());
    }
    let tx = db
        .transaction_with_str_and_mode(store, mode)
        .map_err(|e| IndexedDbError::Transaction(describe(&e).1))?;
    let object_store = tx.object_store(store)?;
    Ok((tx, object_store))
}

/// Await an IdbRequest, resolving to its result JsValue.
pub async fn await_request(req: &IdbRequest) -> Result<JsValue> {
    let promise = request_to_promise(req, None);
    Ok(wasm_bindgen_futures::JsFuture::from(promise).await?)
}

/// Await an IdbTransaction to complete.
pub async fn await_transaction(tx: &IdbTransaction) -> Result<()> {
    let promise = transaction_to_promise(tx);
    wasm_bindgen_futures::JsFuture::from(promise)
        .await
        .map_err(|e| IndexedDbError::Transaction(describe(&e).1))?;
    Ok(())
}

/// Delete an IndexedDB database by name.
pub async fn delete_database(db_name: &str) -> Result<()> {
    let factory = idb_factory()?;
    let req = factory
        .delete_database(db_name)
        .map_err(|e| IndexedDbError::Open(format!("delete db: {}", describe(&e).1)))?;
    let promise = request_to_promise(req.unchecked_ref(), Some(&req));
    wasm_bindgen_futures::JsFuture::from(promise)
        .await
        .map_err(|e| IndexedDbError::Open(format!("delete db: {}", describe(&e).1)))?;
    Ok(())
}
