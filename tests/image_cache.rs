mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use common::{client_for, CountingBackend};
use slideshot::images::{ImageCache, ImageProvisioner, ImageRequest, ImageRequestKey, ManualClock};
use slideshot::{CacheConfig, Error};

fn key(n: usize) -> ImageRequestKey {
    ImageRequestKey::new(format!("prompt {}", n), 512, 512)
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_upstream_call() {
    let backend = CountingBackend::with(Duration::from_millis(50), &[]);
    let provisioner = ImageProvisioner::new(backend.clone(), &CacheConfig::default());
    let k = key(0);

    let results = join_all((0..16).map(|_| provisioner.provision(&k, true))).await;

    assert_eq!(backend.calls(), 1);
    let first = results[0].as_ref().unwrap().payload.clone();
    for r in &results {
        assert_eq!(r.as_ref().unwrap().payload, first);
    }
    assert_eq!(provisioner.in_flight_len(), 0);
    assert_eq!(provisioner.cached_len(), 1);

    // Served from cache afterwards.
    let again = provisioner.provision(&k, true).await.unwrap();
    assert!(again.cached);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn client_dedups_in_front_of_the_endpoint() {
    let backend = CountingBackend::with(Duration::from_millis(20), &[]);
    let (client, provisioner) = client_for(backend.clone());

    let results = join_all((0..8).map(|_| client.resolve("lighthouse", 640, 640))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(backend.calls(), 1);
    assert_eq!(client.cached_len(), 1);
    assert_eq!(provisioner.cached_len(), 1);

    // Different dimensions are a different image.
    client.resolve("lighthouse", 320, 640).await.unwrap();
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn capacity_evicts_least_recently_used() {
    let clock = Arc::new(ManualClock::new());
    let backend = CountingBackend::new();
    let cache = ImageCache::with_clock(&CacheConfig::default(), clock.clone());
    let provisioner = ImageProvisioner::with_cache(backend.clone(), cache);

    for n in 0..200 {
        provisioner.provision(&key(n), true).await.unwrap();
    }
    assert_eq!(provisioner.cached_len(), 200);

    // Touch the oldest entry so it is protected from eviction.
    assert!(provisioner.provision(&key(0), true).await.unwrap().cached);

    provisioner.provision(&key(200), true).await.unwrap();
    assert_eq!(provisioner.cached_len(), 200);
    assert_eq!(backend.calls(), 201);

    assert!(provisioner.provision(&key(0), true).await.unwrap().cached);
    assert!(provisioner.provision(&key(200), true).await.unwrap().cached);
    assert_eq!(backend.calls(), 201);

    // key(1) was the least recently used and is gone.
    let refetched = provisioner.provision(&key(1), true).await.unwrap();
    assert!(!refetched.cached);
    assert_eq!(backend.calls(), 202);
    assert_eq!(backend.calls_for(&key(1)), 2);
}

#[tokio::test]
async fn entries_expire_one_millisecond_after_ttl() {
    let clock = Arc::new(ManualClock::new());
    let backend = CountingBackend::new();
    let config = CacheConfig::default();
    let cache = ImageCache::with_clock(&config, clock.clone());
    let provisioner = ImageProvisioner::with_cache(backend.clone(), cache);
    let k = key(7);

    provisioner.provision(&k, true).await.unwrap();
    clock.advance(config.ttl());
    assert!(provisioner.provision(&k, true).await.unwrap().cached);
    assert_eq!(backend.calls(), 1);

    // The hit above refreshed the entry; idle for TTL + 1ms to expire it.
    clock.advance(config.ttl() + Duration::from_millis(1));
    let fresh = provisioner.provision(&k, true).await.unwrap();
    assert!(!fresh.cached);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn failures_are_shared_but_not_cached() {
    let backend = CountingBackend::with(Duration::from_millis(20), &["storm"]);
    let provisioner = ImageProvisioner::new(backend.clone(), &CacheConfig::default());
    let k = ImageRequestKey::new("storm", 64, 64);

    let results = join_all((0..4).map(|_| provisioner.provision(&k, true))).await;
    assert_eq!(backend.calls(), 1);
    for r in results {
        assert!(matches!(r, Err(Error::CacheBackendUnavailable(_))));
    }
    assert_eq!(provisioner.in_flight_len(), 0);
    assert_eq!(provisioner.cached_len(), 0);

    assert!(provisioner.provision(&k, true).await.is_err());
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn endpoint_requests_apply_defaults_and_validation() {
    let backend = CountingBackend::new();
    let provisioner = ImageProvisioner::new(backend.clone(), &CacheConfig::default());

    let body: ImageRequest = serde_json::from_str(r#"{"prompt": "forest", "width": 300.7}"#).unwrap();
    let response = provisioner.handle(&body).await.unwrap();
    assert!(response.data_url.is_some());
    assert!(!response.cached);
    assert_eq!(backend.calls_for(&ImageRequestKey::new("forest", 300, 1024)), 1);

    let response = provisioner.handle(&body).await.unwrap();
    assert!(response.cached);

    let missing: ImageRequest = serde_json::from_str(r#"{"prompt": "   "}"#).unwrap();
    match provisioner.handle(&missing).await {
        Err(Error::InvalidRequest(msg)) => assert_eq!(msg, "Missing prompt"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn uncached_concurrent_requests_still_share_one_call() {
    let backend = CountingBackend::with(Duration::from_millis(50), &[]);
    let provisioner = ImageProvisioner::new(backend.clone(), &CacheConfig::default());
    let request = ImageRequest {
        cache: Some(false),
        ..ImageRequest::new("fresh every time", 256, 256)
    };

    let responses = join_all((0..8).map(|_| provisioner.handle(&request))).await;

    assert_eq!(backend.calls(), 1);
    for response in &responses {
        let response = response.as_ref().unwrap();
        assert!(!response.cached);
        assert!(response.data_url.is_some());
    }
    assert_eq!(provisioner.in_flight_len(), 0);
    assert_eq!(provisioner.cached_len(), 0);
}
