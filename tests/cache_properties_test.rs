//! Testable properties (spec §8, properties 1-10). Properties that quantify
//! over arbitrary key/value sequences (1, 4, 6, 9) are checked with
//! `proptest`; the rest are single deterministic scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proptest::prelude::*;
use vaultkeep::cache::{self, LivenessFilter, PutOptions, Ttl, UpdateDecision};
use vaultkeep::config::CacheConfig;
use vaultkeep::entry::Value;

fn unique_name(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!("{tag}-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    // Property 1: a `put` followed immediately by a `get` on the same key,
    // with no intervening expiration, always returns the value just written.
    #[test]
    fn prop1_put_then_get_returns_written_value(n in 0i64..10_000) {
        runtime().block_on(async {
            let config = CacheConfig::builder().name(unique_name("p1")).build().unwrap();
            let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();
            cache.put("k".to_string(), Value::Int(n), PutOptions::default()).await.unwrap();
            let got = cache.get(&"k".to_string()).await.unwrap();
            prop_assert_eq!(got, Some(Value::Int(n)));
            cache.stop();
            Ok(())
        })?;
    }

    // Property 4: `delete` is idempotent — deleting an absent key reports
    // no removal and never errors, regardless of how many times it runs.
    #[test]
    fn prop4_delete_is_idempotent(times in 1usize..20) {
        runtime().block_on(async {
            let config = CacheConfig::builder().name(unique_name("p4")).build().unwrap();
            let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();
            cache.put("k".to_string(), Value::Int(1), PutOptions::default()).await.unwrap();

            let first = cache.delete(&"k".to_string()).await.unwrap();
            prop_assert!(first);
            for _ in 0..times {
                let removed = cache.delete(&"k".to_string()).await.unwrap();
                prop_assert!(!removed);
            }
            cache.stop();
            Ok(())
        })?;
    }

    // Property 6: `increment` on a missing key seeds it with `initial` and
    // every subsequent call accumulates `delta` exactly (no lost updates
    // under sequential application).
    #[test]
    fn prop6_increment_accumulates_exactly(initial in -100i64..100, deltas in prop::collection::vec(-50i64..50, 1..20)) {
        runtime().block_on(async {
            let config = CacheConfig::builder().name(unique_name("p6")).build().unwrap();
            let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

            let mut expected = initial;
            let mut last = None;
            for delta in &deltas {
                expected += delta;
                last = Some(cache.increment(&"counter".to_string(), *delta, initial).await.unwrap());
            }
            prop_assert_eq!(last, Some(expected));
            cache.stop();
            Ok(())
        })?;
    }

    // Property 9: `get_and_update` with `UpdateDecision::Ignore` never
    // mutates the stored value, no matter the observed current value.
    #[test]
    fn prop9_ignore_decision_never_mutates(n in 0i64..10_000) {
        runtime().block_on(async {
            let config = CacheConfig::builder().name(unique_name("p9")).build().unwrap();
            let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();
            cache.put("k".to_string(), Value::Int(n), PutOptions::default()).await.unwrap();

            let observed = cache
                .get_and_update(&"k".to_string(), |_current| UpdateDecision::Ignore)
                .await
                .unwrap();
            prop_assert_eq!(observed, Some(Value::Int(n)));

            let after = cache.get(&"k".to_string()).await.unwrap();
            prop_assert_eq!(after, Some(Value::Int(n)));
            cache.stop();
            Ok(())
        })?;
    }
}

// Property 2: an entry whose expiration has elapsed is never returned by
// `get`, even when the janitor has not yet swept it.
#[tokio::test]
async fn prop2_expired_entry_is_never_returned() {
    let config = CacheConfig::builder()
        .name(unique_name("p2"))
        .default_expiration(Duration::from_millis(10))
        .janitor_interval(None)
        .build()
        .unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    cache.put("k".to_string(), Value::Int(1), PutOptions::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert_eq!(cache.get(&"k".to_string()).await.unwrap(), None);
    assert!(!cache.exists(&"k".to_string()).await.unwrap());

    cache.stop();
}

// Property 3: `take` returns the value exactly once and leaves the key
// absent afterward.
#[tokio::test]
async fn prop3_take_returns_value_exactly_once() {
    let config = CacheConfig::builder().name(unique_name("p3")).build().unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    cache.put("k".to_string(), Value::Int(7), PutOptions::default()).await.unwrap();
    let first = cache.take(&"k".to_string()).await.unwrap();
    let second = cache.take(&"k".to_string()).await.unwrap();

    assert_eq!(first, Some(Value::Int(7)));
    assert_eq!(second, None);

    cache.stop();
}

// Property 5: `clear` removes every entry, live or expired, and `size`
// reports zero immediately afterward under both liveness filters.
#[tokio::test]
async fn prop5_clear_empties_the_cache() {
    let config = CacheConfig::builder().name(unique_name("p5")).build().unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    for i in 0..10 {
        cache.put(format!("k{i}"), Value::Int(i), PutOptions::default()).await.unwrap();
    }
    let removed = cache.clear().await.unwrap();
    assert_eq!(removed, 10);
    assert_eq!(cache.size(LivenessFilter::All).await.unwrap(), 0);
    assert_eq!(cache.size(LivenessFilter::Unexpired).await.unwrap(), 0);

    cache.stop();
}

// Property 7: `refresh` extends an entry's expiration without changing its
// stored value.
#[tokio::test]
async fn prop7_refresh_preserves_value_and_extends_ttl() {
    let config = CacheConfig::builder()
        .name(unique_name("p7"))
        .default_expiration(Duration::from_millis(40))
        .build()
        .unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    cache.put("k".to_string(), Value::Text("v".into()), PutOptions::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(cache.refresh(&"k".to_string()).await.unwrap());

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(cache.get(&"k".to_string()).await.unwrap(), Some(Value::Text("v".into())));

    cache.stop();
}

// Property 8: `ttl` on a key with no expiration reports `NoExpiry`; on a
// missing key it reports `None`.
#[tokio::test]
async fn prop8_ttl_reports_no_expiry_and_absent_key() {
    let config = CacheConfig::builder().name(unique_name("p8")).build().unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    cache.put("k".to_string(), Value::Int(1), PutOptions::default()).await.unwrap();
    assert_eq!(cache.ttl(&"k".to_string()).await.unwrap(), Some(Ttl::NoExpiry));
    assert_eq!(cache.ttl(&"missing".to_string()).await.unwrap(), None);

    cache.stop();
}

// Property 10: concurrent writers to disjoint keys never block each other
// (the locksmith's per-key granularity), and every write is visible once
// its writer task completes.
#[tokio::test]
async fn prop10_disjoint_key_writes_are_concurrent_and_durable() {
    let config = CacheConfig::builder().name(unique_name("p10")).build().unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..50 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.put(format!("k{i}"), Value::Int(i), PutOptions::default()).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for i in 0..50 {
        assert_eq!(cache.get(&format!("k{i}")).await.unwrap(), Some(Value::Int(i)));
    }

    cache.stop();
}
