//! Integration tests against a real Redis.
//!
//! Uses testcontainers to start one shared Redis instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pressline_cache::{
    LockBackend, RedisLockBackend, RedisRemoteTier, RedisSettings, RemoteTier, Settings,
    build_cache, connect_redis, keys::KeyPattern,
};
use serde::{Deserialize, Serialize};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");

            (container, url)
        })
        .await;

    url.clone()
}

async fn redis_settings(channel: Option<&str>) -> Settings {
    let mut settings = Settings::default();
    settings.redis = RedisSettings {
        enabled: true,
        url: get_redis_url().await,
        invalidation_channel: channel.map(str::to_string),
        ..RedisSettings::default()
    };
    settings
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[tokio::test]
async fn test_remote_tier_roundtrip_and_ttl() {
    let settings = redis_settings(None).await;
    let pool = connect_redis(&settings.redis).await.expect("redis pool");
    let tier = RedisRemoteTier::new(pool);

    tier.set("rt::a", b"value", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(tier.get("rt::a").await.unwrap(), Some(b"value".to_vec()));

    let ttl = tier.ttl("rt::a").await.unwrap().expect("ttl set");
    assert!(ttl <= Duration::from_secs(30));
    assert!(ttl > Duration::from_secs(25));

    assert!(tier.delete("rt::a").await.unwrap());
    assert!(!tier.delete("rt::a").await.unwrap());
    assert_eq!(tier.ttl("rt::a").await.unwrap(), None);
}

#[tokio::test]
async fn test_remote_tier_pattern_delete() {
    let settings = redis_settings(None).await;
    let pool = connect_redis(&settings.redis).await.expect("redis pool");
    let tier = RedisRemoteTier::new(pool);

    for i in 0..250 {
        tier.set(&format!("scan::page:{i}"), b"x", Duration::from_secs(60))
            .await
            .unwrap();
    }
    tier.set("scan::tag:1", b"x", Duration::from_secs(60))
        .await
        .unwrap();

    let pattern = KeyPattern::new("scan", "page:*").unwrap();
    assert_eq!(tier.delete_matching(&pattern).await.unwrap(), 250);
    assert!(tier.get("scan::page:17").await.unwrap().is_none());
    assert!(tier.get("scan::tag:1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_lock_backend_ownership() {
    let settings = redis_settings(None).await;
    let pool = connect_redis(&settings.redis).await.expect("redis pool");
    let locks = RedisLockBackend::new(pool);
    let key = "cache:lock:it:ownership";

    assert!(locks.try_lock(key, "a", Duration::from_secs(5)).await.unwrap());
    assert!(!locks.try_lock(key, "b", Duration::from_secs(5)).await.unwrap());
    assert_eq!(locks.holder(key).await.unwrap().as_deref(), Some("a"));

    assert!(!locks.unlock(key, "b").await.unwrap());
    assert!(!locks.extend(key, "b", Duration::from_secs(5)).await.unwrap());
    assert!(locks.extend(key, "a", Duration::from_secs(5)).await.unwrap());
    assert!(locks.unlock(key, "a").await.unwrap());
    assert_eq!(locks.holder(key).await.unwrap(), None);
}

#[tokio::test]
async fn test_lock_lease_expires() {
    let settings = redis_settings(None).await;
    let pool = connect_redis(&settings.redis).await.expect("redis pool");
    let locks = RedisLockBackend::new(pool);
    let key = "cache:lock:it:lease";

    assert!(locks.try_lock(key, "crashed", Duration::from_millis(100)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(locks.try_lock(key, "next", Duration::from_secs(5)).await.unwrap());
    locks.unlock(key, "next").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_instances_share_one_load() {
    let settings = redis_settings(None).await;
    let instances = vec![
        build_cache(&settings).await,
        build_cache(&settings).await,
        build_cache(&settings).await,
    ];
    assert_eq!(instances[0].stats().remote_mode, "redis");

    let calls = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..30 {
        let cache = instances[i % instances.len()].clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_with_fallback(
                    "user",
                    "shared-load",
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, String>(Some(User {
                            id: 1,
                            name: "ada".to_string(),
                        }))
                    },
                    None,
                )
                .await
        }));
    }

    for handle in handles {
        let user = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(user.name, "ada");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_negative_entry_shared_across_instances() {
    let settings = redis_settings(None).await;
    let a = build_cache(&settings).await;
    let b = build_cache(&settings).await;
    let calls = AtomicUsize::new(0);

    for cache in [&a, &b] {
        let user: Option<User> = cache
            .get_with_fallback(
                "user",
                "missing-shared",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(None)
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(user, None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let inspection = b.inspect("user", "missing-shared").await.unwrap();
    assert_eq!(inspection.remote, pressline_cache::SlotState::Negative);
    assert!(inspection.remote_ttl.unwrap() <= settings.cache.negative_ttl());
}

#[tokio::test]
async fn test_pubsub_invalidates_peer_local_tier() {
    let settings = redis_settings(Some("cache:invalidate:it")).await;
    let a = build_cache(&settings).await;
    let b = build_cache(&settings).await;
    assert!(b.stats().invalidation);

    // Let both listeners subscribe
    tokio::time::sleep(Duration::from_millis(300)).await;

    let user = User {
        id: 2,
        name: "grace".to_string(),
    };
    a.put("user", "pubsub", &user, None).await.unwrap();
    let _: Option<User> = b
        .get_with_fallback("user", "pubsub", || async { Ok::<_, String>(None) }, None)
        .await
        .unwrap();
    assert!(b.local().get("user::pubsub").await.is_some());

    a.evict("user", "pubsub").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(b.local().get("user::pubsub").await.is_none());
}

#[tokio::test]
async fn test_falls_back_when_redis_unreachable() {
    let mut settings = Settings::default();
    settings.redis.enabled = true;
    settings.redis.url = "redis://127.0.0.1:1".to_string();
    settings.redis.timeout_ms = 500;

    let cache = build_cache(&settings).await;
    assert_eq!(cache.stats().remote_mode, "memory");
}
