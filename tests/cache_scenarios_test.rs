//! End-to-end scenarios (spec §8, S1-S6). Timings are scaled down from the
//! spec's illustrative milliseconds so the suite runs quickly, but preserve
//! the same ratios between expiration, sweep, and observation delays.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vaultkeep::cache::{self, LivenessFilter, PutOptions};
use vaultkeep::config::{CacheConfig, EvictionModeConfig};
use vaultkeep::courier::LoaderOutcome;
use vaultkeep::entry::Value;

fn unique_name(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!("{tag}-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

#[tokio::test]
async fn s1_lazy_expiry_purges_on_read() {
    let config = CacheConfig::builder()
        .name(unique_name("s1"))
        .default_expiration(Duration::from_millis(10))
        .lazy_expiration(true)
        .build()
        .unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    cache.put("a".to_string(), Value::Int(1), PutOptions::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = cache.get(&"a".to_string()).await.unwrap();
    assert_eq!(result, None);
    assert_eq!(cache.size(LivenessFilter::All).await.unwrap(), 0);

    cache.stop();
}

#[tokio::test]
async fn s2_janitor_sweep_removes_expired_and_updates_stats() {
    let config = CacheConfig::builder()
        .name(unique_name("s2"))
        .default_expiration(Duration::from_millis(5))
        .lazy_expiration(false)
        .janitor_interval(Some(Duration::from_millis(25)))
        .with_stats_hook(true)
        .build()
        .unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    cache.put("a".to_string(), Value::Int(1), PutOptions::default()).await.unwrap();
    cache.put("b".to_string(), Value::Int(2), PutOptions::default()).await.unwrap();
    cache.put("c".to_string(), Value::Int(3), PutOptions::default()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(70)).await;

    assert_eq!(cache.size(LivenessFilter::All).await.unwrap(), 0);
    let stats = cache.stats().unwrap();
    assert_eq!(stats.expirations, 3);

    cache.stop();
}

#[tokio::test]
async fn s3_transaction_isolates_partial_writes() {
    let config = CacheConfig::builder().name(unique_name("s3")).build().unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    let writer = cache.clone();
    let txn = tokio::spawn(async move {
        writer
            .transaction(["x".to_string(), "y".to_string()], || async {
                writer.put("x".to_string(), Value::Int(1), PutOptions::default()).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                writer.put("y".to_string(), Value::Int(1), PutOptions::default()).await.unwrap();
            })
            .await;
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let x = cache.get(&"x".to_string()).await.unwrap();
    let y = cache.get(&"y".to_string()).await.unwrap();
    assert_eq!(x.is_some(), y.is_some(), "reader must observe all-or-nothing of the transaction");

    txn.await.unwrap();
    cache.stop();
}

#[tokio::test]
async fn s4_lrw_eviction_keeps_newest_entries() {
    let config = CacheConfig::builder()
        .name(unique_name("s4"))
        .size_limit(Some(100))
        .reclaim_fraction(0.25)
        .eviction_mode(EvictionModeConfig::Evented)
        .build()
        .unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    for i in 0..100 {
        cache.put(format!("k{i}"), Value::Int(i), PutOptions::default()).await.unwrap();
    }
    cache.put("k100".to_string(), Value::Int(100), PutOptions::default()).await.unwrap();

    let size = cache.size(LivenessFilter::All).await.unwrap();
    assert!(size <= 75, "expected size <= 75 after eviction, got {size}");
    for i in 0..25 {
        assert!(cache.get(&format!("k{i}")).await.unwrap().is_none());
    }
    for i in 77..101 {
        assert!(cache.get(&format!("k{i}")).await.unwrap().is_some());
    }

    cache.stop();
}

#[tokio::test]
async fn s5_single_flight_fetch_invokes_loader_once() {
    let config = CacheConfig::builder().name(unique_name("s5")).build().unwrap();
    let cache = cache::create::<String>(config, vec![], vec![], None, true).await.unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let invocations = invocations.clone();
        handles.push(tokio::spawn(async move {
            cache
                .fetch(&"k".to_string(), move |_key| {
                    let invocations = invocations.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(LoaderOutcome::Commit(Value::Int(42)))
                    }
                })
                .await
        }));
    }

    for handle in handles {
        let value = handle.await.unwrap().unwrap();
        assert_eq!(value, Value::Int(42));
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get(&"k".to_string()).await.unwrap(), Some(Value::Int(42)));

    cache.stop();
}

#[tokio::test]
async fn s6_snapshot_round_trip_preserves_remaining_ttl() {
    let dir = std::env::temp_dir().join(format!("vaultkeep-scenario-s6-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("snapshot.dump");

    let source_config = CacheConfig::builder()
        .name(unique_name("s6-source"))
        .build()
        .unwrap();
    let source = cache::create::<String>(source_config, vec![], vec![], None, true).await.unwrap();

    source
        .put(
            "a".to_string(),
            Value::Int(1),
            PutOptions { expiration: Some(Duration::from_millis(100)) },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    source.save(&path, vaultkeep::codec::Compression::None).await.unwrap();
    source.stop();

    tokio::time::sleep(Duration::from_millis(10)).await;

    let dest_config = CacheConfig::builder().name(unique_name("s6-dest")).build().unwrap();
    let dest = cache::create::<String>(dest_config, vec![], vec![], None, true).await.unwrap();
    dest.restore(&path).await.unwrap();

    let ttl = dest.ttl(&"a".to_string()).await.unwrap();
    match ttl {
        Some(vaultkeep::cache::Ttl::Remaining(remaining)) => {
            assert!(remaining <= Duration::from_millis(60), "remaining={remaining:?}");
            assert!(remaining >= Duration::from_millis(10), "remaining={remaining:?}");
        }
        other => panic!("expected a remaining ttl, got {other:?}"),
    }

    dest.stop();
    std::fs::remove_file(&path).ok();
}
