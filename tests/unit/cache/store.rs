use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Barrier, mpsc};
use std::time::Duration;

fn fp(n: u64) -> Fingerprint {
    Fingerprint { hi: 7, lo: n }
}

fn req(scene_id: &str, n: u64) -> CacheRequest<'_> {
    CacheRequest {
        scene_id,
        fingerprint: fp(n),
        max_size: None,
        force: false,
    }
}

fn write_bytes(len: usize) -> impl FnOnce(&Path) -> WeaveResult<()> {
    move |out: &Path| {
        std::fs::write(out, vec![0u8; len]).map_err(|e| WeaveError::render("t", e.to_string()))
    }
}

#[test]
fn miss_renders_then_hit_reuses() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
        let a = store
            .get_or_render(&req("intro", 1), |out| {
                calls.fetch_add(1, Ordering::SeqCst);
                std::fs::write(out, b"clip").map_err(|e| WeaveError::render("intro", e.to_string()))
            })
            .unwrap();
        assert!(a.path.is_file());
        assert!(a.path.ends_with(ARTIFACT_FILE));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.total_bytes(), 4);
    assert_eq!(store.scene_bytes("intro"), 4);

    let e = &store.entries()[0];
    assert_eq!(e.scene_id, "intro");
    assert_eq!(e.size_bytes, 4);
    assert!(e.last_used_at >= e.created_at);
}

#[test]
fn first_call_reports_rendered_and_second_hit() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let a = store.get_or_render(&req("a", 1), write_bytes(3)).unwrap();
    assert_eq!(a.source, ArtifactSource::Rendered);
    drop(a);
    let b = store.get_or_render(&req("a", 1), write_bytes(3)).unwrap();
    assert_eq!(b.source, ArtifactSource::Hit);
}

#[test]
fn entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = CacheStore::open(dir.path(), None).unwrap();
        store.get_or_render(&req("a", 1), write_bytes(10)).unwrap();
    }
    let store = CacheStore::open(dir.path(), None).unwrap();
    assert!(store.contains(fp(1)));
    assert_eq!(store.total_bytes(), 10);
    let hit = store
        .get_or_render(&req("a", 1), |_| panic!("must not render"))
        .unwrap();
    assert_eq!(hit.source, ArtifactSource::Hit);
}

#[test]
fn failed_render_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let err = store
        .get_or_render(&req("a", 1), |out| {
            std::fs::write(out, b"half").unwrap();
            Err(WeaveError::render("a", "encoder crashed"))
        })
        .unwrap_err();
    assert!(err.to_string().contains("encoder crashed"));
    assert!(!store.contains(fp(1)));
    assert_eq!(store.total_bytes(), 0);
    let entry_dir = dir.path().join("a").join(fp(1).to_string());
    assert!(!entry_dir.join(PARTIAL_FILE).exists());
    assert!(!entry_dir.join(ARTIFACT_FILE).exists());
}

#[test]
fn cancelled_render_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let err = store
        .get_or_render(&req("a", 1), |out| {
            std::fs::write(out, b"partial").unwrap();
            Err(WeaveError::Cancelled)
        })
        .unwrap_err();
    assert!(matches!(err, WeaveError::Cancelled));
    assert!(store.entries().is_empty());
}

#[test]
fn reopen_purges_partial_files() {
    let dir = tempfile::tempdir().unwrap();
    let stale = dir.path().join("a").join(fp(9).to_string());
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join(PARTIAL_FILE), b"junk").unwrap();

    let store = CacheStore::open(dir.path(), None).unwrap();
    assert!(store.entries().is_empty());
    assert!(!stale.exists());
}

#[test]
fn force_rerenders_existing_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    store.get_or_render(&req("a", 1), write_bytes(4)).unwrap();

    let forced = CacheRequest {
        force: true,
        ..req("a", 1)
    };
    let a = store.get_or_render(&forced, write_bytes(6)).unwrap();
    assert_eq!(a.source, ArtifactSource::Rendered);
    assert_eq!(std::fs::metadata(&a.path).unwrap().len(), 6);
    assert_eq!(store.total_bytes(), 6);
    assert_eq!(store.entries().len(), 1);
}

#[test]
fn per_scene_cap_evicts_least_recently_used() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let capped = |n| CacheRequest {
        max_size: Some(ByteSize(25)),
        ..req("s", n)
    };

    drop(store.get_or_render(&capped(1), write_bytes(10)).unwrap());
    drop(store.get_or_render(&capped(2), write_bytes(10)).unwrap());
    // Touch 1 so that 2 becomes the oldest.
    drop(store.get_or_render(&capped(1), write_bytes(10)).unwrap());
    drop(store.get_or_render(&capped(3), write_bytes(10)).unwrap());

    assert!(store.contains(fp(1)));
    assert!(!store.contains(fp(2)));
    assert!(store.contains(fp(3)));
    assert!(store.scene_bytes("s") <= 25);
    assert!(!dir.path().join("s").join(fp(2).to_string()).exists());
}

#[test]
fn per_scene_cap_leaves_other_scenes_alone() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    drop(store.get_or_render(&req("other", 1), write_bytes(50)).unwrap());
    let capped = |n| CacheRequest {
        max_size: Some(ByteSize(15)),
        ..req("s", n)
    };
    drop(store.get_or_render(&capped(2), write_bytes(10)).unwrap());
    drop(store.get_or_render(&capped(3), write_bytes(10)).unwrap());
    assert!(store.contains(fp(1)));
    assert!(!store.contains(fp(2)));
    assert!(store.contains(fp(3)));
}

#[test]
fn global_cap_evicts_across_scenes() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), Some(ByteSize(20))).unwrap();
    drop(store.get_or_render(&req("a", 1), write_bytes(10)).unwrap());
    drop(store.get_or_render(&req("b", 2), write_bytes(10)).unwrap());
    drop(store.get_or_render(&req("c", 3), write_bytes(10)).unwrap());
    assert!(!store.contains(fp(1)));
    assert!(store.total_bytes() <= 20);
}

#[test]
fn pinned_entries_are_not_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), Some(ByteSize(20))).unwrap();
    let held = store.get_or_render(&req("a", 1), write_bytes(10)).unwrap();
    drop(store.get_or_render(&req("b", 2), write_bytes(10)).unwrap());
    drop(store.get_or_render(&req("c", 3), write_bytes(10)).unwrap());
    assert!(store.contains(fp(1)));
    assert!(held.path.is_file());
    assert!(!store.contains(fp(2)));
}

#[test]
fn releasing_pins_restores_global_cap() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), Some(ByteSize(8))).unwrap();
    let held: Vec<_> = ["a", "b", "c"]
        .iter()
        .zip(1..)
        .map(|(id, n)| store.get_or_render(&req(id, n), write_bytes(4)).unwrap())
        .collect();
    assert_eq!(store.total_bytes(), 12);

    drop(held);
    assert!(store.total_bytes() <= 8);
    assert!(!store.contains(fp(1)));
    assert!(store.contains(fp(3)));
}

#[test]
fn releasing_pins_restores_scene_cap() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let capped = |n| CacheRequest {
        max_size: Some(ByteSize(15)),
        ..req("s", n)
    };
    let first = store.get_or_render(&capped(1), write_bytes(10)).unwrap();
    let second = store.get_or_render(&capped(2), write_bytes(10)).unwrap();
    assert_eq!(store.scene_bytes("s"), 20);

    drop(first);
    drop(second);
    assert!(store.scene_bytes("s") <= 15);
    assert!(store.contains(fp(2)));
    assert_eq!(store.entries()[0].max_size, Some(ByteSize(15)));
}

#[test]
fn recency_order_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = CacheStore::open(dir.path(), None).unwrap();
        drop(store.get_or_render(&req("a", 1), write_bytes(4)).unwrap());
        drop(store.get_or_render(&req("b", 2), write_bytes(4)).unwrap());
        drop(store.get_or_render(&req("a", 1), write_bytes(4)).unwrap());
    }
    let store = CacheStore::open(dir.path(), Some(ByteSize(4))).unwrap();
    assert!(store.contains(fp(1)));
    assert!(!store.contains(fp(2)));
}

#[test]
fn oversized_artifact_is_returned_uncached() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let r = CacheRequest {
        max_size: Some(ByteSize(5)),
        ..req("big", 1)
    };
    let a = store.get_or_render(&r, write_bytes(8)).unwrap();
    assert_eq!(a.source, ArtifactSource::Uncached);
    assert!(a.path.is_file());
    assert!(!store.contains(fp(1)));
    assert_eq!(store.total_bytes(), 0);
}

#[test]
fn concurrent_requests_render_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let calls = AtomicUsize::new(0);
    let n = 8;
    let barrier = Barrier::new(n);

    let paths: Vec<PathBuf> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..n)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    let a = store
                        .get_or_render(&req("x", 1), |out| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            std::fs::write(out, b"shared")
                                .map_err(|e| WeaveError::render("x", e.to_string()))
                        })
                        .unwrap();
                    a.path.clone()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(paths.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn waiters_share_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let (started_tx, started_rx) = mpsc::channel();

    std::thread::scope(|s| {
        let leader = s.spawn(|| {
            store.get_or_render(&req("x", 1), |_| {
                started_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                Err(WeaveError::render("x", "boom"))
            })
            .map(|a| a.path.clone())
        });
        started_rx.recv().unwrap();
        let follower = store
            .get_or_render(&req("x", 1), |_| panic!("follower must not render"))
            .map(|a| a.path.clone());
        let leader = leader.join().unwrap();
        assert!(leader.unwrap_err().to_string().contains("boom"));
        assert!(follower.unwrap_err().to_string().contains("boom"));
    });
    assert!(store.entries().is_empty());
}

#[test]
fn clean_waits_for_in_flight_render() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    drop(store.get_or_render(&req("a", 1), write_bytes(5)).unwrap());
    let (started_tx, started_rx) = mpsc::channel();

    std::thread::scope(|s| {
        s.spawn(|| {
            drop(
                store
                    .get_or_render(&req("b", 2), |out| {
                        started_tx.send(()).unwrap();
                        std::thread::sleep(Duration::from_millis(100));
                        std::fs::write(out, b"late").map_err(|e| WeaveError::render("b", e.to_string()))
                    })
                    .unwrap(),
            );
        });
        started_rx.recv().unwrap();
        let report = store.clean().unwrap();
        assert_eq!(report.entries, 2);
        assert_eq!(report.bytes, 9);
    });
    assert!(store.entries().is_empty());
    assert_eq!(store.total_bytes(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn verify_repairs_vanished_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), None).unwrap();
    let path = store
        .get_or_render(&req("a", 1), write_bytes(5))
        .unwrap()
        .path
        .clone();
    drop(store.get_or_render(&req("b", 2), write_bytes(7)).unwrap());
    assert!(!store.verify().drift);

    std::fs::remove_file(&path).unwrap();
    let report = store.verify();
    assert!(report.drift);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.entries, 1);
    assert_eq!(store.total_bytes(), 7);
}

#[test]
fn scene_ids_are_sanitized_for_paths() {
    assert_eq!(sanitize("intro"), "intro");
    assert_eq!(sanitize("a/b c"), "a_b_c");
    assert_eq!(sanitize(".hidden"), "_.hidden");
    assert_eq!(sanitize(""), "_");
}
