//! Engine behavior: caching, coalescing, expiry, eviction, and the local
//! halves of set/remove/clear on a peer-less group.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use hive_core::{
    CacheError, CacheKind, Context, Expiry, Getter, GetterFn, Group, JsonSink, NoPeers, Sink,
    StringSink, WallClock,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Peer-less group echoing `ECHO:{key}`, counting loader invocations.
fn echo_group(name: &str, cache_bytes: i64, fills: Arc<AtomicUsize>) -> Group {
    let getter = GetterFn::new(move |_ctx: &Context, key: &str, dest: &mut dyn Sink| {
        fills.fetch_add(1, Ordering::SeqCst);
        dest.set_string(&format!("ECHO:{key}"), Expiry::NONE)?;
        Ok(())
    });
    Group::with_picker(
        name,
        cache_bytes,
        Arc::new(getter),
        Arc::new(NoPeers),
        Arc::new(WallClock),
    )
}

async fn get_string(group: &Group, key: &str) -> Result<String, CacheError> {
    let mut out = String::new();
    group
        .get(&Context::background(), key, &mut StringSink::new(&mut out))
        .await?;
    Ok(out)
}

#[tokio::test]
async fn repeated_gets_fill_once() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("caching", 1 << 20, Arc::clone(&fills));

    for _ in 0..10 {
        let value = get_string(&group, "TestCaching-key").await.expect("get");
        assert_eq!(value, "ECHO:TestCaching-key");
    }

    assert_eq!(fills.load(Ordering::SeqCst), 1);
    let stats = group.stats();
    assert_eq!(stats.gets, 10);
    assert_eq!(stats.cache_hits, 9);
    assert_eq!(stats.local_loads, 1);
}

struct BlockingGetter {
    fills: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Getter for BlockingGetter {
    async fn get(&self, _ctx: &Context, key: &str, dest: &mut dyn Sink) -> anyhow::Result<()> {
        self.fills.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await?;
        dest.set_string(&format!("ECHO:{key}"), Expiry::NONE)?;
        Ok(())
    }
}

#[tokio::test]
async fn concurrent_gets_are_coalesced() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let group = Group::with_picker(
        "dedup",
        1 << 20,
        Arc::new(BlockingGetter {
            fills: Arc::clone(&fills),
            gate: Arc::clone(&gate),
        }),
        Arc::new(NoPeers),
        Arc::new(WallClock),
    );

    let mut handles = Vec::new();
    for _ in 0..2 {
        let group = group.clone();
        handles.push(tokio::spawn(async move {
            let mut out = String::new();
            group
                .get(&Context::background(), "foo", &mut StringSink::new(&mut out))
                .await
                .map(|_| out)
        }));
    }

    // Let both callers latch onto the same flight before releasing it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.add_permits(1);

    for handle in handles {
        let value = handle.await.expect("join").expect("get");
        assert_eq!(value, "ECHO:foo");
    }
    assert_eq!(fills.load(Ordering::SeqCst), 1);
    assert_eq!(group.stats().loads_deduped, 1);
}

#[tokio::test]
async fn expired_entries_reload() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let loader_fills = Arc::clone(&fills);
    let getter = GetterFn::new(move |_ctx: &Context, key: &str, dest: &mut dyn Sink| {
        loader_fills.fetch_add(1, Ordering::SeqCst);
        let expire = Expiry::after(&WallClock, Duration::from_millis(100));
        dest.set_string(&format!("ECHO:{key}"), expire)?;
        Ok(())
    });
    let group = Group::with_picker(
        "expire",
        1 << 20,
        Arc::new(getter),
        Arc::new(NoPeers),
        Arc::new(WallClock),
    );

    for i in 0..3 {
        get_string(&group, "TestCachingExpire-key").await.expect("get");
        if i == 1 {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    }

    assert_eq!(fills.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn flooding_evicts_and_forces_reload() {
    init_tracing();
    const CACHE_BYTES: i64 = 1 << 20;
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("eviction", CACHE_BYTES, Arc::clone(&fills));

    let test_key = "TestCacheEviction-key";
    for _ in 0..10 {
        get_string(&group, test_key).await.expect("get");
    }
    assert_eq!(fills.load(Ordering::SeqCst), 1);

    let evictions_before = group.cache_stats(CacheKind::Main).evictions;

    // Trash the cache with other keys.
    let mut flooded: i64 = 0;
    while flooded < CACHE_BYTES + 1024 {
        let key = format!("dummy-key-{flooded}");
        let value = get_string(&group, &key).await.expect("get");
        flooded += (key.len() + value.len()) as i64;
    }

    let main = group.cache_stats(CacheKind::Main);
    assert!(main.evictions > evictions_before);
    let hot = group.cache_stats(CacheKind::Hot);
    assert!(main.bytes + hot.bytes <= CACHE_BYTES);

    let fills_before = fills.load(Ordering::SeqCst);
    for _ in 0..10 {
        get_string(&group, test_key).await.expect("get");
    }
    assert_eq!(fills.load(Ordering::SeqCst), fills_before + 1);
}

#[tokio::test]
async fn clear_drops_every_key() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("purging", 1 << 20, Arc::clone(&fills));

    get_string(&group, "key1").await.expect("get");
    get_string(&group, "key2").await.expect("get");
    assert_eq!(fills.load(Ordering::SeqCst), 2);

    group.clear(&Context::background()).await.expect("clear");
    assert_eq!(group.cache_stats(CacheKind::Main).items, 0);
    assert_eq!(group.cache_stats(CacheKind::Main).bytes, 0);

    get_string(&group, "key1").await.expect("get");
    get_string(&group, "key2").await.expect("get");
    assert_eq!(fills.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn local_set_serves_without_fill() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("set", 1 << 20, Arc::clone(&fills));
    let ctx = Context::background();

    group
        .set(&ctx, "k", "stored".into(), Expiry::NONE, false)
        .await
        .expect("set");

    assert_eq!(get_string(&group, "k").await.expect("get"), "stored");
    assert_eq!(fills.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn local_set_with_expiry_lapses() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("set-expire", 1 << 20, Arc::clone(&fills));
    let ctx = Context::background();

    let expire = Expiry::after(&WallClock, Duration::from_millis(50));
    group
        .set(&ctx, "k", "stored".into(), expire, false)
        .await
        .expect("set");
    assert_eq!(get_string(&group, "k").await.expect("get"), "stored");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(get_string(&group, "k").await.expect("get"), "ECHO:k");
    assert_eq!(fills.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn replacing_set_keeps_byte_accounting_exact() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("accounting", 1 << 20, Arc::clone(&fills));
    let ctx = Context::background();
    let key = "testkey";

    for size in [100usize, 1000, 2000] {
        group
            .set(&ctx, key, vec![0u8; size].into(), Expiry::NONE, false)
            .await
            .expect("set");
        let main = group.cache_stats(CacheKind::Main);
        assert_eq!(main.items, 1);
        assert_eq!(main.bytes, (key.len() + size) as i64);
    }
}

#[tokio::test]
async fn remove_forces_reload() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("remove", 1 << 20, Arc::clone(&fills));
    let ctx = Context::background();

    get_string(&group, "k").await.expect("get");
    assert_eq!(fills.load(Ordering::SeqCst), 1);

    group.remove(&ctx, "k").await.expect("remove");
    get_string(&group, "k").await.expect("get");
    assert_eq!(fills.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_keys_are_rejected() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("empty", 1 << 20, fills);
    let ctx = Context::background();

    let err = group
        .set(&ctx, "", "v".into(), Expiry::NONE, false)
        .await
        .unwrap_err();
    assert_eq!(err, CacheError::EmptyKey);

    let err = group.remove(&ctx, "").await.unwrap_err();
    assert_eq!(err, CacheError::EmptyKey);
}

#[tokio::test]
async fn expired_context_fails_fast() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("ctx", 1 << 20, Arc::clone(&fills));

    let ctx = Context::with_timeout(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let mut out = String::new();
    let err = group
        .get(&ctx, "k", &mut StringSink::new(&mut out))
        .await
        .unwrap_err();
    assert_eq!(err, CacheError::DeadlineExceeded);
    assert_eq!(fills.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn loader_errors_surface_and_are_not_cached() {
    init_tracing();
    let attempts = Arc::new(AtomicUsize::new(0));
    let loader_attempts = Arc::clone(&attempts);
    let getter = GetterFn::new(move |_ctx: &Context, _key: &str, _dest: &mut dyn Sink| {
        loader_attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("backend down"))
    });
    let group = Group::with_picker(
        "loader-err",
        1 << 20,
        Arc::new(getter),
        Arc::new(NoPeers),
        Arc::new(WallClock),
    );

    for _ in 0..2 {
        let err = get_string(&group, "k").await.unwrap_err();
        assert!(matches!(err, CacheError::Loader { .. }));
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(group.stats().local_load_errs, 2);
}

#[tokio::test]
async fn json_loader_fills_typed_sink() {
    init_tracing();
    #[derive(Debug, Default, PartialEq, serde::Deserialize)]
    struct Profile {
        name: String,
        city: String,
    }

    let getter = GetterFn::new(|_ctx: &Context, key: &str, dest: &mut dyn Sink| {
        let doc = serde_json::json!({"name": format!("ECHO:{key}"), "city": "SOME-CITY"});
        dest.set_json(&doc, Expiry::NONE)?;
        Ok(())
    });
    let group = Group::with_picker(
        "json",
        1 << 20,
        Arc::new(getter),
        Arc::new(NoPeers),
        Arc::new(WallClock),
    );

    let mut profile = Profile::default();
    group
        .get(
            &Context::background(),
            "Fluffy",
            &mut JsonSink::new(&mut profile),
        )
        .await
        .expect("get");
    assert_eq!(
        profile,
        Profile {
            name: "ECHO:Fluffy".to_string(),
            city: "SOME-CITY".to_string(),
        }
    );

    // The second read decodes the cached canonical bytes.
    let mut again = Profile::default();
    group
        .get(
            &Context::background(),
            "Fluffy",
            &mut JsonSink::new(&mut again),
        )
        .await
        .expect("get");
    assert_eq!(again.name, "ECHO:Fluffy");
    assert_eq!(group.stats().cache_hits, 1);
}

#[tokio::test]
async fn global_registry_round_trip() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let loader_fills = Arc::clone(&fills);
    let getter = GetterFn::new(move |_ctx: &Context, key: &str, dest: &mut dyn Sink| {
        loader_fills.fetch_add(1, Ordering::SeqCst);
        dest.set_string(&format!("ECHO:{key}"), Expiry::NONE)?;
        Ok(())
    });

    let group = hive_core::new_group("global-users", 1 << 20, Arc::new(getter), Arc::new(WallClock));
    let found = hive_core::get_group("global-users").expect("registered");
    assert_eq!(found.name(), "global-users");

    // Handles share state: a get through one is a hit through the other.
    get_string(&group, "alice").await.expect("get");
    get_string(&found, "alice").await.expect("get");
    assert_eq!(fills.load(Ordering::SeqCst), 1);

    assert!(hive_core::deregister_group("global-users"));
    assert!(hive_core::get_group("global-users").is_none());
}

#[tokio::test]
async fn zero_budget_disables_caching() {
    init_tracing();
    let fills = Arc::new(AtomicUsize::new(0));
    let group = echo_group("uncached", 0, Arc::clone(&fills));

    for _ in 0..3 {
        get_string(&group, "k").await.expect("get");
    }
    assert_eq!(fills.load(Ordering::SeqCst), 3);
    assert_eq!(group.cache_stats(CacheKind::Main).items, 0);
}
