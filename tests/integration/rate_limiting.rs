use std::sync::Arc;
use std::thread;

use skillpack::PackError;
use skillpack::config::RateLimitsConfig;
use skillpack::registry::rate_limit::{Counter, CounterStore};
use skillpack::registry::{
    Actor, Clock, FsBlobStore, ManualClock, MemoryCounterStore, NewSkill, RateLimit, RateLimiter,
    Registry, RegistrySettings, SqliteCounterStore,
};

use crate::fixture::{RegistryFixture, START_MS};

const WINDOW_MS: i64 = 60_000;

fn limiter_with(store: Box<dyn CounterStore>) -> (RateLimiter, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START_MS));
    let limiter = RateLimiter::new(store, clock.clone());
    (limiter, clock)
}

fn assert_fixed_window(limiter: &RateLimiter, clock: &ManualClock) {
    for _ in 0..5 {
        limiter.enforce("actor-1:publish", 5, WINDOW_MS).unwrap();
    }
    let err = limiter.enforce("actor-1:publish", 5, WINDOW_MS).unwrap_err();
    match err {
        PackError::RateLimited { key, retry_after_ms } => {
            assert_eq!(key, "actor-1:publish");
            assert!(retry_after_ms > 0 && retry_after_ms <= WINDOW_MS);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(
        limiter.counter("actor-1:publish").unwrap().map(|c| c.count),
        Some(5)
    );

    let window_start = START_MS.div_euclid(WINDOW_MS) * WINDOW_MS;
    clock.set(window_start + WINDOW_MS);
    limiter.enforce("actor-1:publish", 5, WINDOW_MS).unwrap();
    assert_eq!(
        limiter.counter("actor-1:publish").unwrap(),
        Some(Counter {
            window_start: clock.now_ms(),
            count: 1
        })
    );
}

#[test]
fn memory_store_applies_fixed_window() {
    let (limiter, clock) = limiter_with(Box::new(MemoryCounterStore::new()));
    assert_fixed_window(&limiter, &clock);
}

#[test]
fn sqlite_store_applies_fixed_window() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteCounterStore::open(&dir.path().join("limits.db")).unwrap();
    let (limiter, clock) = limiter_with(Box::new(store));
    assert_fixed_window(&limiter, &clock);
}

#[test]
fn sqlite_counters_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limits.db");
    {
        let (limiter, _) = limiter_with(Box::new(SqliteCounterStore::open(&path).unwrap()));
        for _ in 0..5 {
            limiter.enforce("k", 5, WINDOW_MS).unwrap();
        }
    }
    let (limiter, _) = limiter_with(Box::new(SqliteCounterStore::open(&path).unwrap()));
    assert!(matches!(
        limiter.enforce("k", 5, WINDOW_MS),
        Err(PackError::RateLimited { .. })
    ));
}

#[test]
fn keys_are_independent() {
    let (limiter, _) = limiter_with(Box::new(MemoryCounterStore::new()));
    limiter.enforce("a", 1, WINDOW_MS).unwrap();
    assert!(limiter.enforce("a", 1, WINDOW_MS).is_err());
    limiter.enforce("b", 1, WINDOW_MS).unwrap();
}

#[test]
fn registry_limits_each_actor_operation_separately() {
    let f = RegistryFixture::new();
    for i in 0..5 {
        f.create_skill(&format!("skill-{i}"));
    }
    let err = f
        .registry
        .create_skill(
            Some(&f.owner),
            NewSkill {
                slug: "skill-6".into(),
                name: "Six".into(),
                ..NewSkill::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, PackError::RateLimited { .. }), "{err:?}");
    assert!(err.is_transient());

    // Another operation on the same actor still has budget.
    f.registry.generate_upload_url(Some(&f.owner)).unwrap();

    f.next_window();
    f.create_skill("skill-6");
}

fn count_admitted(results: &[skillpack::Result<()>]) -> usize {
    for result in results {
        if let Err(err) = result {
            assert!(matches!(err, PackError::RateLimited { .. }), "{err:?}");
        }
    }
    results.iter().filter(|r| r.is_ok()).count()
}

#[test]
fn shared_sqlite_limiter_never_admits_past_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteCounterStore::open(&dir.path().join("limits.db")).unwrap();
    let (limiter, _) = limiter_with(Box::new(store));

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    (0..3)
                        .map(|_| limiter.enforce("actor-1:publish", 5, WINDOW_MS))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    assert_eq!(results.len(), 24);
    assert_eq!(count_admitted(&results), 5);
    assert_eq!(
        limiter.counter("actor-1:publish").unwrap().map(|c| c.count),
        Some(5)
    );
}

#[test]
fn separate_connections_share_one_budget() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limits.db");
    let clock = Arc::new(ManualClock::new(START_MS));
    let limiters: Vec<RateLimiter> = (0..12)
        .map(|_| {
            RateLimiter::new(
                Box::new(SqliteCounterStore::open(&path).unwrap()),
                clock.clone(),
            )
        })
        .collect();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = limiters
            .iter()
            .map(|limiter| scope.spawn(move || limiter.enforce("actor-1:publish", 5, WINDOW_MS)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(count_admitted(&results), 5);
    assert_eq!(
        limiters[0].counter("actor-1:publish").unwrap().map(|c| c.count),
        Some(5)
    );
}

#[test]
fn file_backed_registry_limits_concurrent_callers() {
    let dir = tempfile::tempdir().unwrap();
    // A window far longer than the test keeps every call in one window.
    let long_window = RateLimit::new(5, 1_000 * 60 * 60 * 24 * 365 * 100);
    let settings = RegistrySettings {
        rate_limits: RateLimitsConfig {
            generate_upload_url: long_window,
            ..RateLimitsConfig::default()
        },
        ..RegistrySettings::default()
    };
    let blobs = Arc::new(FsBlobStore::open(dir.path()).unwrap());
    let registry = Registry::open(dir.path(), blobs, settings).unwrap();
    let actor = Actor::new("actor-1");

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..12)
            .map(|_| scope.spawn(|| registry.generate_upload_url(Some(&actor)).map(|_| ())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(count_admitted(&results), 5);
}
