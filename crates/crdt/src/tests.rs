//! Unit tests for the version graph CRDT
//!
//! Tests cover:
//! - Version hashing and tamper detection
//! - Head maintenance under in-order and out-of-order insertion
//! - Merge algebra (commutativity, associativity, idempotence)
//! - Dangling parent tolerance
//! - Wire shape of the serialized store

use super::*;

fn version(author: &str, message: &str, parents: Vec<String>) -> FileVersion {
    FileVersion::new(author, message, "bafy-test-cid", parents)
}

fn meta_with(file_name: &str, versions: &[&FileVersion]) -> FileMetadata {
    let mut meta = FileMetadata::new(file_name);
    for version in versions {
        meta.add_version((*version).clone());
    }
    meta
}

// ============================================================
// Version hashing
// ============================================================

#[test]
fn test_version_id_matches_recomputed_hash() {
    let v = version("peer-a", "initial import", vec![]);

    assert_eq!(v.version_id, v.computed_id());
    assert!(v.verify_id());
    assert_eq!(v.version_id.len(), 64, "hex-encoded SHA-256");
}

#[test]
fn test_version_id_depends_on_every_field() {
    let base = version("peer-a", "msg", vec![]);

    let mut changed = base.clone();
    changed.message = "other".to_owned();
    assert_ne!(base.computed_id(), changed.computed_id());

    let mut changed = base.clone();
    changed.author = "peer-b".to_owned();
    assert_ne!(base.computed_id(), changed.computed_id());

    let mut changed = base.clone();
    changed.content_id = "bafy-other".to_owned();
    assert_ne!(base.computed_id(), changed.computed_id());

    let mut changed = base.clone();
    changed.parent_ids = vec!["0".repeat(64)];
    assert_ne!(base.computed_id(), changed.computed_id());
}

#[test]
fn test_parent_order_is_significant() {
    let p1 = "1".repeat(64);
    let p2 = "2".repeat(64);

    let a = version("peer-a", "merge", vec![p1.clone(), p2.clone()]);
    let b = FileVersion {
        parent_ids: vec![p2, p1],
        ..a.clone()
    };

    assert_ne!(a.computed_id(), b.computed_id());
}

#[test]
fn test_tampered_version_fails_verification() {
    let mut v = version("peer-a", "legit", vec![]);
    v.content_id = "swapped-in-transit".to_owned();

    assert!(!v.verify_id());
}

#[test]
fn test_field_separator_cannot_be_smuggled() {
    // A newline inside a field must not collide with the separator between
    // fields: author "a\nb" with message "c" differs from "a" with "b\nc".
    let a = FileVersion::new("a\nb", "c", "cid", vec![]);
    let b = FileVersion {
        author: "a".to_owned(),
        message: "b\nc".to_owned(),
        ..a.clone()
    };

    assert_ne!(a.computed_id(), b.computed_id());
}

// ============================================================
// Head maintenance
// ============================================================

#[test]
fn test_add_version_linear_chain() {
    let root = version("peer-a", "root", vec![]);
    let child = version("peer-a", "child", vec![root.version_id.clone()]);

    let mut meta = FileMetadata::new("notes.txt");

    meta.add_version(root.clone());
    assert_eq!(meta.heads(), [root.version_id.clone()]);

    meta.add_version(child.clone());
    assert_eq!(meta.heads(), [child.version_id.clone()]);
    assert_eq!(meta.versions.len(), 2);
}

#[test]
fn test_add_version_is_idempotent() {
    let root = version("peer-a", "root", vec![]);

    let mut meta = FileMetadata::new("notes.txt");
    meta.add_version(root.clone());
    meta.add_version(root.clone());

    assert_eq!(meta.versions.len(), 1);
    assert_eq!(meta.heads(), [root.version_id]);
}

#[test]
fn test_heads_never_contain_new_versions_parents() {
    let root = version("peer-a", "root", vec![]);
    let left = version("peer-a", "left", vec![root.version_id.clone()]);
    let right = version("peer-b", "right", vec![root.version_id.clone()]);

    let meta = meta_with("notes.txt", &[&root, &left, &right]);

    let mut expected = vec![left.version_id.clone(), right.version_id.clone()];
    expected.sort();

    assert_eq!(meta.heads(), expected);
    assert!(!meta.heads().contains(&root.version_id));
}

#[test]
fn test_multiple_roots_are_permitted() {
    let a = version("peer-a", "root a", vec![]);
    let b = version("peer-b", "root b", vec![]);

    let meta = meta_with("notes.txt", &[&a, &b]);

    assert_eq!(meta.heads().len(), 2);
}

#[test]
fn test_out_of_order_insertion_keeps_heads_reduced() {
    let root = version("peer-a", "root", vec![]);
    let child = version("peer-a", "child", vec![root.version_id.clone()]);

    // Child arrives before its parent; the parent must not surface as a
    // head once it shows up.
    let meta = meta_with("notes.txt", &[&child, &root]);

    assert_eq!(meta.heads(), [child.version_id]);
}

#[test]
fn test_dangling_parent_is_tolerated() {
    let child = version("peer-a", "child of unseen", vec!["f".repeat(64)]);

    let meta = meta_with("notes.txt", &[&child]);

    assert_eq!(meta.heads(), [child.version_id]);
    assert_eq!(meta.versions.len(), 1);
}

#[test]
fn test_merge_commit_consumes_both_heads() {
    let root = version("peer-a", "root", vec![]);
    let left = version("peer-a", "left", vec![root.version_id.clone()]);
    let right = version("peer-b", "right", vec![root.version_id.clone()]);
    let merged = version(
        "peer-a",
        "merge",
        vec![left.version_id.clone(), right.version_id.clone()],
    );

    let meta = meta_with("notes.txt", &[&root, &left, &right, &merged]);

    assert_eq!(meta.heads(), [merged.version_id]);
}

// ============================================================
// Merge algebra
// ============================================================

#[test]
fn test_merge_is_commutative() {
    let root = version("peer-a", "root", vec![]);
    let left = version("peer-a", "left", vec![root.version_id.clone()]);
    let right = version("peer-b", "right", vec![root.version_id.clone()]);

    let a = meta_with("f", &[&root, &left]);
    let b = meta_with("f", &[&root, &right]);

    assert_eq!(FileMetadata::merge(&a, &b), FileMetadata::merge(&b, &a));
}

#[test]
fn test_merge_is_associative() {
    let root = version("peer-a", "root", vec![]);
    let v1 = version("peer-a", "one", vec![root.version_id.clone()]);
    let v2 = version("peer-b", "two", vec![root.version_id.clone()]);
    let v3 = version("peer-c", "three", vec![v1.version_id.clone()]);

    let a = meta_with("f", &[&root, &v1]);
    let b = meta_with("f", &[&root, &v2]);
    let c = meta_with("f", &[&v3]);

    let left = FileMetadata::merge(&FileMetadata::merge(&a, &b), &c);
    let right = FileMetadata::merge(&a, &FileMetadata::merge(&b, &c));

    assert_eq!(left, right);
}

#[test]
fn test_merge_is_idempotent() {
    let root = version("peer-a", "root", vec![]);
    let child = version("peer-a", "child", vec![root.version_id.clone()]);

    let a = meta_with("f", &[&root, &child]);

    assert_eq!(FileMetadata::merge(&a, &a), a);
}

#[test]
fn test_merge_reduces_superseded_heads() {
    let root = version("peer-a", "root", vec![]);
    let child = version("peer-b", "child", vec![root.version_id.clone()]);

    // One replica only ever saw the root; the other has its descendant.
    let stale = meta_with("f", &[&root]);
    let fresh = meta_with("f", &[&root, &child]);

    let merged = FileMetadata::merge(&stale, &fresh);

    assert_eq!(merged.heads(), [child.version_id]);
}

#[test]
fn test_merge_closure_over_parent_references() {
    let root = version("peer-a", "root", vec![]);
    let left = version("peer-a", "left", vec![root.version_id.clone()]);
    let right = version("peer-b", "right", vec![root.version_id.clone()]);

    let a = meta_with("f", &[&root, &left]);
    let b = meta_with("f", &[&root, &right]);

    let merged = FileMetadata::merge(&a, &b);

    for parent in merged.versions.values().flat_map(|v| &v.parent_ids) {
        assert!(
            merged.versions.contains_key(parent),
            "parent {parent} missing from merged versions"
        );
    }
}

#[test]
fn test_fork_convergence_after_one_exchange() {
    // Peer A holds {v0, v1<-v0}, peer B holds {v0, v2<-v0}; both sides must
    // end with versions {v0, v1, v2} and heads sorted({v1, v2}).
    let v0 = version("peer-a", "root", vec![]);
    let v1 = version("peer-a", "a edit", vec![v0.version_id.clone()]);
    let v2 = version("peer-b", "b edit", vec![v0.version_id.clone()]);

    let a = meta_with("f", &[&v0, &v1]);
    let b = meta_with("f", &[&v0, &v2]);

    let on_a = FileMetadata::merge(&a, &b);
    let on_b = FileMetadata::merge(&b, &a);

    assert_eq!(on_a, on_b);
    assert_eq!(on_a.versions.len(), 3);

    let mut expected = vec![v1.version_id, v2.version_id];
    expected.sort();
    assert_eq!(on_a.heads(), expected);
}

// ============================================================
// Store-wide merge
// ============================================================

#[test]
fn test_store_merge_unions_file_names() {
    let only_a = version("peer-a", "root", vec![]);
    let only_b = version("peer-b", "root", vec![]);
    let shared = version("peer-a", "root", vec![]);

    let mut a = MetadataStore::new();
    a.entry("a.txt").add_version(only_a.clone());
    a.entry("shared.txt").add_version(shared.clone());

    let mut b = MetadataStore::new();
    b.entry("b.txt").add_version(only_b.clone());
    b.entry("shared.txt").add_version(shared.clone());

    let merged = MetadataStore::merge(&a, &b);

    assert_eq!(merged.len(), 3);
    assert_eq!(merged.get("shared.txt").unwrap().versions.len(), 1);
    assert_eq!(MetadataStore::merge(&b, &a), merged);
}

#[test]
fn test_store_merge_is_idempotent() {
    let root = version("peer-a", "root", vec![]);

    let mut store = MetadataStore::new();
    store.entry("f").add_version(root);

    assert_eq!(MetadataStore::merge(&store, &store), store);
}

#[test]
fn test_retain_verified_drops_tampered_versions() {
    let good = version("peer-a", "good", vec![]);
    let mut bad = version("peer-b", "bad", vec![]);
    bad.content_id = "forged".to_owned();

    let mut store = MetadataStore::new();
    store.entry("f").add_version(good.clone());
    store.entry("f").add_version(bad.clone());

    let rejected = store.retain_verified();

    assert_eq!(rejected, 1);

    let meta = store.get("f").unwrap();
    assert!(meta.versions.contains_key(&good.version_id));
    assert!(!meta.versions.contains_key(&bad.version_id));
    assert_eq!(meta.heads(), [good.version_id]);
}

// ============================================================
// Wire shape
// ============================================================

#[test]
fn test_serialized_store_matches_wire_shape() {
    let v = version("peer-a", "hello", vec![]);

    let mut store = MetadataStore::new();
    store.entry("docs/x.txt").add_version(v.clone());

    let json = serde_json::to_value(&store).unwrap();

    let meta = &json["docs/x.txt"];
    assert_eq!(meta["file_name"], "docs/x.txt");
    assert_eq!(meta["heads"][0], v.version_id);

    let wire_version = &meta["versions"][&v.version_id];
    assert_eq!(wire_version["version_id"], v.version_id);
    assert_eq!(wire_version["cid"], "bafy-test-cid");
    assert_eq!(wire_version["author"], "peer-a");
    assert!(wire_version["parent_ids"].as_array().unwrap().is_empty());

    let timestamp = wire_version["timestamp"].as_str().unwrap();
    assert!(timestamp.ends_with('Z'));
    assert_eq!(timestamp, canonical_timestamp(&v.timestamp));
}

#[test]
fn test_serialization_never_emits_raw_newlines() {
    let v = FileVersion::new("peer-a", "line one\nline two", "cid", vec![]);

    let mut store = MetadataStore::new();
    store.entry("f").add_version(v);

    let encoded = serde_json::to_vec(&store).unwrap();

    assert!(!encoded.contains(&b'\n'));
}

#[test]
fn test_store_round_trips_through_json() {
    let root = version("peer-a", "root", vec![]);
    let child = version("peer-b", "child", vec![root.version_id.clone()]);

    let mut store = MetadataStore::new();
    store.entry("f").add_version(root);
    store.entry("f").add_version(child);

    let encoded = serde_json::to_vec(&store).unwrap();
    let mut decoded: MetadataStore = serde_json::from_slice(&encoded).unwrap();

    assert_eq!(decoded, store);
    assert_eq!(decoded.retain_verified(), 0, "round trip must preserve ids");
}
