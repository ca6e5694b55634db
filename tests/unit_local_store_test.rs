use bytes::Bytes;
use coldstored::core::errors::ColdStoreError;
use coldstored::core::storage::{LocalStore, ObjectStore, StoreBody};
use tempfile::TempDir;

fn store() -> (TempDir, LocalStore) {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::new("test-local", dir.path());
    (dir, store)
}

#[test]
fn test_resolve_rejects_traversal() {
    let (_dir, store) = store();
    for key in [
        "../outside.txt",
        "a/../../outside.txt",
        "/etc/passwd",
        "a/b/../../../etc/passwd",
    ] {
        let err = store.resolve(key).unwrap_err();
        assert!(
            matches!(err, ColdStoreError::PathEscape(_)),
            "key {key:?} resolved to {err:?}"
        );
    }
}

#[test]
fn test_resolve_normalises_inside_root() {
    let (dir, store) = store();
    let path = store.resolve("a/./b/c.txt").unwrap();
    assert!(path.starts_with(dir.path()));
    assert!(path.ends_with("a/b/c.txt"));
}

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let (_dir, store) = store();
    let payload = Bytes::from_static(b"cold storage payload");
    store
        .upload("base/2026/08/01/10/dump.sql", StoreBody::Bytes(payload.clone()))
        .await
        .unwrap();

    let mut download = store.download("base/2026/08/01/10/dump.sql").await.unwrap();
    assert_eq!(download.size, payload.len() as u64);
    let mut contents = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut download.reader, &mut contents)
        .await
        .unwrap();
    assert_eq!(contents, payload.as_ref());
}

#[tokio::test]
async fn test_download_missing_is_not_found() {
    let (_dir, store) = store();
    let err = store.download("missing.txt").await.unwrap_err();
    assert!(matches!(err, ColdStoreError::NotFound(_)));
}

#[tokio::test]
async fn test_list_orders_directories_before_files() {
    let (_dir, store) = store();
    store
        .upload("root/zz.txt", StoreBody::Bytes(Bytes::from_static(b"z")))
        .await
        .unwrap();
    store
        .upload("root/aa.txt", StoreBody::Bytes(Bytes::from_static(b"a")))
        .await
        .unwrap();
    store
        .upload("root/bdir/inner.txt", StoreBody::Bytes(Bytes::from_static(b"i")))
        .await
        .unwrap();
    store
        .upload("root/adir/inner.txt", StoreBody::Bytes(Bytes::from_static(b"i")))
        .await
        .unwrap();

    let entries = store.list("root").await.unwrap();
    let names: Vec<(&str, bool)> = entries
        .iter()
        .map(|e| (e.name.as_str(), e.is_dir))
        .collect();
    assert_eq!(
        names,
        vec![
            ("adir", true),
            ("bdir", true),
            ("aa.txt", false),
            ("zz.txt", false),
        ]
    );
}

#[tokio::test]
async fn test_list_recursive_returns_full_keys() {
    let (_dir, store) = store();
    store
        .upload("base/2026/08/01/10/a.sql", StoreBody::Bytes(Bytes::from_static(b"a")))
        .await
        .unwrap();
    store
        .upload("base/2026/08/02/11/b.sql", StoreBody::Bytes(Bytes::from_static(b"b")))
        .await
        .unwrap();

    let objects = store.list_recursive("base/").await.unwrap();
    let keys: Vec<&str> = objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["base/2026/08/01/10/a.sql", "base/2026/08/02/11/b.sql"]);
}

#[tokio::test]
async fn test_move_and_exists() {
    let (_dir, store) = store();
    store
        .upload("src.txt", StoreBody::Bytes(Bytes::from_static(b"x")))
        .await
        .unwrap();
    store.move_object("src.txt", "sub/dst.txt").await.unwrap();
    assert!(!store.exists("src.txt").await.unwrap());
    assert!(store.exists("sub/dst.txt").await.unwrap());

    let meta = store.stat("sub/dst.txt").await.unwrap();
    assert_eq!(meta.size, 1);
    assert!(meta.last_modified.is_some());
}

#[tokio::test]
async fn test_delete_prefix_and_file() {
    let (_dir, store) = store();
    store
        .upload("p/a.txt", StoreBody::Bytes(Bytes::from_static(b"a")))
        .await
        .unwrap();
    store
        .upload("p/b.txt", StoreBody::Bytes(Bytes::from_static(b"b")))
        .await
        .unwrap();
    store.delete("p/a.txt").await.unwrap();
    assert!(!store.exists("p/a.txt").await.unwrap());
    store.delete("p/").await.unwrap();
    assert!(!store.exists("p/b.txt").await.unwrap());
    // Deleting something already gone is not an error.
    store.delete("p/").await.unwrap();
}
