//! Concurrent access to the cache coordinator.

use std::sync::{Arc, Barrier};
use std::thread;

use rand::seq::SliceRandom;
use rand::Rng;

use pipeline_router::cache::{
    Artifact, CacheCoordinator, CacheKey, InMemoryCoordinator, Resolution, RevalidationError, ValidityDescriptor,
};
use pipeline_router::config::CacheConfig;

#[derive(Debug, Clone, Copy)]
enum Op {
    Store,
    Lookup,
    Resolve,
}

fn coordinator(max_entries: usize) -> Arc<InMemoryCoordinator> {
    Arc::new(InMemoryCoordinator::new(&CacheConfig {
        max_entries,
        ..CacheConfig::default()
    }))
}

fn key(n: usize) -> CacheKey {
    CacheKey::simple("concurrent", [n.to_string()])
}

fn body(n: usize, round: usize) -> String {
    format!("key {} round {}", n, round)
}

#[test]
fn test_distinct_keys_under_random_interleaving() {
    const THREADS: usize = 16;
    const ROUNDS: usize = 50;

    for _ in 0..5 {
        let cache = coordinator(THREADS * 2);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|n| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut ops: Vec<Op> = (0..ROUNDS)
                        .flat_map(|_| [Op::Store, Op::Lookup, Op::Resolve])
                        .collect();
                    ops.shuffle(&mut rng);

                    barrier.wait();
                    let mut last_written: Option<String> = None;
                    for (round, op) in ops.into_iter().enumerate() {
                        match op {
                            Op::Store => {
                                let content = body(n, round);
                                cache
                                    .store(key(n), ValidityDescriptor::Always, Artifact::new(content.clone(), "text/plain"))
                                    .unwrap();
                                last_written = Some(content);
                            }
                            Op::Lookup => {
                                let found = cache.lookup(&key(n)).map(|e| e.artifact.content().to_vec());
                                assert_eq!(found, last_written.clone().map(String::into_bytes));
                            }
                            Op::Resolve => {
                                let provider = || -> Result<ValidityDescriptor, RevalidationError> {
                                    panic!("provider must not run for an always-valid entry")
                                };
                                match cache.resolve(&key(n), &provider) {
                                    Resolution::UseCached(artifact) => {
                                        assert_eq!(Some(artifact.content().to_vec()), last_written.clone().map(String::into_bytes));
                                    }
                                    Resolution::Recompute(_) => assert!(last_written.is_none()),
                                }
                            }
                        }
                        if rng.gen_bool(0.1) {
                            thread::yield_now();
                        }
                    }
                    last_written
                })
            })
            .collect();

        let finals: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (n, last) in finals.into_iter().enumerate() {
            let stored = cache.lookup(&key(n)).map(|e| e.artifact.content().to_vec());
            assert_eq!(stored, last.map(String::into_bytes), "key {} lost or corrupted", n);
        }
    }
}

#[test]
fn test_same_key_last_writer_wins() {
    const WRITERS: usize = 8;
    let cache = coordinator(16);
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|n| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..100 {
                    cache
                        .store(key(0), ValidityDescriptor::Always, Artifact::new(body(n, round), "text/plain"))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entry = cache.lookup(&key(0)).unwrap();
    let content = String::from_utf8(entry.artifact.content().to_vec()).unwrap();
    assert!(content.ends_with("round 99"), "unexpected final value {}", content);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_invalidation_races_with_stores() {
    let cache = coordinator(1024);
    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for n in 0..500 {
                cache
                    .store(key(n), ValidityDescriptor::Always, Artifact::new(body(n, 0), "text/plain"))
                    .unwrap();
            }
        })
    };
    let invalidator = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..500 {
                cache.invalidate(&key(rng.gen_range(0..500)));
            }
        })
    };
    writer.join().unwrap();
    invalidator.join().unwrap();

    for n in 0..500 {
        if let Some(entry) = cache.lookup(&key(n)) {
            assert_eq!(entry.artifact.content(), body(n, 0).as_bytes());
        }
    }
    assert!(cache.len() <= 500);
}
