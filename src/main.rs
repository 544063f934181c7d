//! vaultkeep - in-process concurrent key/value cache
//!
//! Demo binary: starts a named cache with the built-in stats hook, exercises
//! a handful of operations, and prints the resulting statistics.

use std::panic;
use std::time::Duration;

use vaultkeep::cache::{self, LivenessFilter, PutOptions};
use vaultkeep::config::CacheConfig;
use vaultkeep::entry::Value;

fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("vaultkeep fatal error:");
        eprintln!("{}", panic_info);
        if let Some(location) = panic_info.location() {
            eprintln!("location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("═══════════════════════════════════════════════════════════");
    tracing::info!("  vaultkeep - in-process concurrent key/value cache");
    tracing::info!("  version: {}", vaultkeep::VERSION);
    tracing::info!("═══════════════════════════════════════════════════════════");

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run_demo());

    match &result {
        Ok(()) => tracing::info!("demo complete"),
        Err(e) => tracing::error!(error = %e, "demo failed"),
    }

    result
}

async fn run_demo() -> anyhow::Result<()> {
    let config = CacheConfig::builder()
        .name("demo")
        .default_expiration(Duration::from_secs(30))
        .size_limit(Some(10_000))
        .janitor_interval(Some(Duration::from_secs(60)))
        .with_stats_hook(true)
        .build()?;

    let cache = cache::create::<String>(config, vec![], vec![], None, true).await?;

    cache
        .put("greeting".to_string(), Value::Text("hello".into()), PutOptions::default())
        .await?;
    let value = cache.get(&"greeting".to_string()).await?;
    tracing::info!(?value, "read back greeting");

    cache.increment(&"visits".to_string(), 1, 0).await?;
    cache.increment(&"visits".to_string(), 1, 0).await?;
    let visits = cache.get(&"visits".to_string()).await?;
    tracing::info!(?visits, "visit counter");

    let size = cache.size(LivenessFilter::Unexpired).await?;
    tracing::info!(size, "live entry count");

    if let Ok(snapshot) = cache.stats() {
        tracing::info!(
            operations = snapshot.operations,
            hits = snapshot.hits,
            misses = snapshot.misses,
            hit_rate = snapshot.hit_rate,
            "cache statistics"
        );
    }

    cache.stop();
    Ok(())
}
