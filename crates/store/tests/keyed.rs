#![forbid(unsafe_code)]

use std::sync::Arc;

use beluga_core::LiteObj;
use beluga_store::{namespace_key, KeyFunc, MemoryStore, Store, StoreError};

fn store() -> MemoryStore<LiteObj> {
    let key_fn: KeyFunc<LiteObj> = Arc::new(namespace_key);
    MemoryStore::new(key_fn)
}

fn obj(ns: Option<&str>, name: &str, v: i64) -> LiteObj {
    LiteObj::new(ns, name, serde_json::json!({ "v": v }))
}

#[test]
fn namespace_key_formats() {
    assert_eq!(namespace_key(&obj(Some("ns"), "a", 1)).unwrap(), "ns/a");
    assert_eq!(namespace_key(&obj(None, "node-1", 1)).unwrap(), "node-1");
    // Empty namespace behaves like cluster-scoped.
    assert_eq!(namespace_key(&obj(Some(""), "a", 1)).unwrap(), "a");
    assert!(matches!(namespace_key(&obj(Some("ns"), "", 1)), Err(StoreError::Key(_))));
}

#[test]
fn add_get_update_delete_roundtrip() {
    let s = store();
    assert!(s.is_empty());

    s.add(obj(Some("ns"), "a", 1)).unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(s.get(&obj(Some("ns"), "a", 999)).unwrap().unwrap().raw["v"], 1);

    s.update(obj(Some("ns"), "a", 2)).unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(s.get_by_key("ns/a").unwrap().unwrap().raw["v"], 2);

    s.delete(&obj(Some("ns"), "a", 2)).unwrap();
    assert!(s.get_by_key("ns/a").unwrap().is_none());
    assert!(s.is_empty());
}

#[test]
fn one_entry_per_key() {
    let s = store();
    s.add(obj(Some("ns"), "a", 1)).unwrap();
    s.add(obj(Some("ns"), "a", 2)).unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(s.get_by_key("ns/a").unwrap().unwrap().raw["v"], 2);

    // Same name in another namespace is a distinct entry.
    s.add(obj(Some("other"), "a", 3)).unwrap();
    assert_eq!(s.len(), 2);
    let mut keys = s.keys();
    keys.sort();
    assert_eq!(keys, vec!["ns/a".to_string(), "other/a".to_string()]);
}

#[test]
fn key_failure_leaves_store_untouched() {
    let s = store();
    s.add(obj(Some("ns"), "a", 1)).unwrap();
    assert!(s.add(obj(Some("ns"), "", 1)).is_err());
    assert!(s.delete(&obj(Some("ns"), "", 1)).is_err());
    assert_eq!(s.len(), 1);
    assert_eq!(s.list().len(), 1);
}
