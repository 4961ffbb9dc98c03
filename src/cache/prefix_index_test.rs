use std::time::Duration;

use tokio::time::Instant;

use super::prefix_index::parent_prefix;
use super::*;

const ROOT: &str = "/cse-sr/inst/files/";

#[test]
fn test_parent_prefix() {
    assert_eq!(parent_prefix("/a/b/c"), Some("/a/b/"));
    assert_eq!(parent_prefix("/a/b/"), Some("/a/"));
    assert_eq!(parent_prefix("/a/"), Some("/"));
    assert_eq!(parent_prefix("/"), None);
    assert_eq!(parent_prefix(""), None);
}

#[test]
fn test_add_key_builds_ancestors_up_to_root() {
    let mut index = PrefixIndex::new(ROOT, 16);
    index.add_key("/cse-sr/inst/files/d/p/s1/i1");

    assert!(index.contains_prefix("/cse-sr/inst/files/d/p/s1/"));
    assert!(index.contains_prefix("/cse-sr/inst/files/d/p/"));
    assert!(index.contains_prefix("/cse-sr/inst/files/d/"));
    assert!(index.contains_prefix(ROOT));
    assert!(!index.contains_prefix("/cse-sr/inst/"));
    assert_eq!(index.len(), 4);
}

#[test]
fn test_get_keys_returns_live_keys_under_prefix() {
    let mut index = PrefixIndex::new(ROOT, 16);
    index.add_key("/cse-sr/inst/files/d/p/s1/i1");
    index.add_key("/cse-sr/inst/files/d/p/s1/i2");
    index.add_key("/cse-sr/inst/files/d/p/s2/i1");

    assert_eq!(
        index.get_keys("/cse-sr/inst/files/d/p/s1/"),
        vec![
            "/cse-sr/inst/files/d/p/s1/i1".to_string(),
            "/cse-sr/inst/files/d/p/s1/i2".to_string(),
        ]
    );
    assert_eq!(index.count("/cse-sr/inst/files/d/p/"), 3);
    assert_eq!(index.count(ROOT), 3);
    assert_eq!(index.count("/cse-sr/inst/files/x/"), 0);
}

#[test]
fn test_delete_last_key_removes_every_empty_ancestor() {
    let mut index = PrefixIndex::new(ROOT, 16);
    index.add_key("/cse-sr/inst/files/d/p/s1/i1");
    index.add_key("/cse-sr/inst/files/d/p/s2/i1");

    index.delete_key("/cse-sr/inst/files/d/p/s1/i1");
    assert!(!index.contains_prefix("/cse-sr/inst/files/d/p/s1/"));
    assert!(index.contains_prefix("/cse-sr/inst/files/d/p/"));

    index.delete_key("/cse-sr/inst/files/d/p/s2/i1");
    assert!(index.is_empty());
    assert_eq!(index.count(ROOT), 0);
}

#[test]
fn test_delete_unknown_key_is_noop() {
    let mut index = PrefixIndex::new(ROOT, 16);
    index.add_key("/cse-sr/inst/files/d/p/s1/i1");
    index.delete_key("/cse-sr/inst/files/d/p/s1/unknown");
    index.delete_key("/elsewhere/x");
    assert_eq!(index.count(ROOT), 1);
}

#[test]
fn test_keys_outside_root_are_ignored() {
    let mut index = PrefixIndex::new(ROOT, 16);
    index.add_key("/cse-sr/ms/files/d/p/s1");
    assert!(index.is_empty());
}

#[test]
fn test_compact_preserves_query_results() {
    let mut index = PrefixIndex::new(ROOT, 4);
    for i in 0..50 {
        index.add_key(&format!("/cse-sr/inst/files/d/p/s{i}/i"));
    }
    for i in 1..50 {
        index.delete_key(&format!("/cse-sr/inst/files/d/p/s{i}/i"));
    }
    let before = index.get_keys(ROOT);
    let len = index.len();

    index.compact();

    assert_eq!(index.get_keys(ROOT), before);
    assert_eq!(index.len(), len);
}

#[test]
fn test_compaction_gate_requires_growth_shrink_and_interval() {
    let start = Instant::now();
    let mut gate = CompactionGate::new(10, 2, Duration::from_secs(60));

    // Small index, never armed
    assert!(!gate.observe(5, start + Duration::from_secs(120)));

    // Grown past init_size * compact_times but still large
    assert!(!gate.observe(25, start + Duration::from_secs(120)));

    // Shrunk back, interval elapsed
    assert!(gate.observe(8, start + Duration::from_secs(120)));
    gate.compacted(8, start + Duration::from_secs(120));

    // Peak reset by the compaction
    assert!(!gate.observe(8, start + Duration::from_secs(500)));
}

#[test]
fn test_compaction_gate_respects_interval() {
    let start = Instant::now();
    let mut gate = CompactionGate::new(10, 2, Duration::from_secs(60));
    gate.observe(30, start);

    assert!(!gate.observe(5, start + Duration::from_secs(10)));
    assert!(gate.observe(5, start + Duration::from_secs(61)));
}
