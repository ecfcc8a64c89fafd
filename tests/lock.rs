use hilok::{HiLok, LockError, Policy};
use std::time::{Duration, Instant};

#[test]
fn write_after_release() {
    let h = HiLok::builder().policy(Policy::Strict).build();
    let mut w = h.write("/a/b");
    w.release();
    let _w2 = h.write("/a/b");
    assert!(matches!(h.try_write("/a/b"), Err(LockError::Busy(_))));
}

#[test]
fn scoped_write() {
    let h = HiLok::new();
    {
        let _w = h.write("/a/b");
        assert!(h.try_write("/a/b").is_err());
    }
    let _w = h.try_write("/a/b").unwrap();
}

#[test]
fn early_release_frees_the_slot() {
    let h = HiLok::builder().policy(Policy::Strict).build();
    let mut w = h.write("/a/b");
    w.release();
    let _again = h.try_write("/a/b").unwrap();
    drop(w); // releasing the dead handle again changes nothing
    assert!(h.try_write("/a/b").is_err());
}

#[test]
fn release_is_idempotent() {
    let h = HiLok::new();
    let mut w = h.write("/a");
    w.release();
    w.release();
    assert!(w.is_released());
    let mut w2 = h.try_write("/a").unwrap();
    w2.release();
    drop(w2);
    assert_eq!(h.node_count(), 1);
}

#[test]
fn readers_compose_writers_exclude() {
    let h = HiLok::builder().policy(Policy::Strict).build();
    let r1 = h.read("/a/b");
    let r2 = h.try_read("/a/b").unwrap();
    assert!(h.try_write("/a/b").is_err());
    drop(r1);
    assert!(h.try_write("/a/b").is_err());
    drop(r2);
    let _w = h.try_write("/a/b").unwrap();
}

#[test]
fn write_parent_times_out() {
    let h = HiLok::builder().policy(Policy::Strict).build();
    let _r = h.read("/a/b/c/d/e");
    let start = Instant::now();
    let res = h.try_write_for("/a/b", Duration::from_millis(100));
    assert!(matches!(res, Err(LockError::Busy(_))));
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[test]
fn deep_read_excludes_ancestor_writes() {
    let h = HiLok::new();
    let _r = h.read("/a/b/c/d/e");
    assert!(h.try_write("/a/b").is_err());
    assert!(h.try_write("/a").is_err());
    assert!(h.try_write("").is_err());
    // but reads anywhere on the chain still compose
    assert!(h.try_read("/a/b").is_ok());
}

#[test]
fn alternate_separator() {
    let h = HiLok::builder().separator(':').build();
    assert_eq!(h.separator(), ':');
    let _r = h.read("a:b");
    assert!(h.try_write("a").is_err());
}

#[test]
fn redundant_separators_collapse() {
    let h = HiLok::new();
    let _w = h.write("//a///b/");
    assert!(h.try_write("/a/b").is_err());
    assert!(h.is_locked("a/b"));
}

#[test]
fn root_write_excludes_everything() {
    let h = HiLok::new();
    let w = h.write("/");
    assert!(h.try_read("/a").is_err());
    assert!(h.try_write("/a/b/c").is_err());
    drop(w);
    assert!(h.try_read("/a").is_ok());
}

#[test]
fn zero_timeout_is_nonblocking() {
    let h = HiLok::new();
    let _w = h.write("/a");
    let start = Instant::now();
    assert!(h.try_write_for("/a", Duration::ZERO).is_err());
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn failed_try_leaves_no_trace() {
    let h = HiLok::new();
    let _w = h.write("/a/b");
    assert_eq!(h.node_count(), 3);
    // fails on the read of /a/b, after speculatively creating /a/b/c and
    // /a/b/c/d; both are pruned by the unwind
    assert!(h.try_write("/a/b/c/d").is_err());
    assert_eq!(h.node_count(), 3);
}

#[test]
fn subtrees_prune_on_release() {
    let h = HiLok::new();
    assert_eq!(h.node_count(), 1);
    let r = h.read("/a/b/c");
    let w = h.write("/a/x");
    assert_eq!(h.node_count(), 5);
    drop(r);
    assert_eq!(h.node_count(), 3); // /a survives on /a/x's chain
    drop(w);
    assert_eq!(h.node_count(), 1);
    assert!(!h.is_locked("/a"));
    assert!(!h.is_locked("")); // the root's own counters are back to zero
}

#[test]
fn timed_acquire_succeeds_when_free() {
    let h = HiLok::new();
    let r = h.try_read_for("/a", Duration::from_millis(50)).unwrap();
    drop(r);
    let _w = h.try_write_for("/a", Duration::from_millis(50)).unwrap();
}

#[test]
fn is_locked_probes_single_node() {
    let h = HiLok::new();
    assert!(!h.is_locked("/a"));
    let _r = h.read("/a/b");
    assert!(h.is_locked("/a")); // read-held as part of the chain
    assert!(h.is_locked("/a/b"));
    assert!(!h.is_locked("/a/b/c")); // never created
    assert!(h.is_locked("")); // the chain starts at the root
}

#[test]
fn strict_write_with_quiet_subtree() {
    let h = HiLok::builder().policy(Policy::Strict).build();
    assert_eq!(h.policy(), Policy::Strict);
    {
        let _r = h.read("/a/b/c");
    }
    let _w = h.try_write("/a").unwrap();
}

#[test]
fn policy_split_after_rename() {
    // A held subtree renamed under fresh ancestors is invisible to a
    // recursive write on those ancestors: the handle's chain still covers
    // the old path.
    let h = HiLok::new();
    let w = h.write("/src/leaf");
    h.try_rename("/src/leaf", "/dst/leaf").unwrap();
    let _w2 = h.try_write("/dst").unwrap();
    drop(w);

    // A strict tree sweeps the subtree and refuses.
    let hs = HiLok::builder().policy(Policy::Strict).build();
    let ws = hs.write("/src/leaf");
    hs.try_rename("/src/leaf", "/dst/leaf").unwrap();
    assert!(hs.try_write("/dst").is_err());
    drop(ws);
}

#[test]
fn debug_renders_shape() {
    let h = HiLok::new();
    let _r = h.read("/a");
    let rendered = format!("{h:?}");
    assert!(rendered.contains("\"a\""));
}

#[test]
fn error_messages_name_the_path() {
    let h = HiLok::new();
    let _w = h.write("/a");
    let err = h.try_write("/a").unwrap_err();
    assert_eq!(err.to_string(), "busy: /a");
    let err = h.rename("/missing", "/elsewhere").unwrap_err();
    assert_eq!(err.to_string(), "not found: /missing");
}
