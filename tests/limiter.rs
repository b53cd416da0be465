//! Behavioural tests for the rate limiter over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use ratewarden::error::RatewardenError;
use ratewarden::ratelimit::{Decision, ManualClock, RateLimiter, Rule, Timestamp};
use ratewarden::store::{MemoryWindowStore, WindowStore};

fn clocked_store() -> (Arc<MemoryWindowStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_micros(
        1_700_000_000_000_000,
    )));
    let store = Arc::new(MemoryWindowStore::with_clock(clock.clone()));
    (store, clock)
}

#[tokio::test]
async fn test_limit_then_deny() {
    let (store, _clock) = clocked_store();
    let rule = Rule::per_seconds(2, 10).unwrap();

    assert!(store.check_and_update(&rule, "u2").await.unwrap());
    assert!(store.check_and_update(&rule, "u2").await.unwrap());
    assert!(!store.check_and_update(&rule, "u2").await.unwrap());
}

#[tokio::test]
async fn test_window_fully_slides_after_period() {
    let (store, clock) = clocked_store();
    let rule = Rule::per_seconds(1, 2).unwrap();

    assert!(store.check_and_update(&rule, "u3").await.unwrap());
    assert!(!store.check_and_update(&rule, "u3").await.unwrap());

    clock.advance(Duration::from_millis(2100));
    assert!(store.check_and_update(&rule, "u3").await.unwrap());
}

#[tokio::test]
async fn test_window_slides_on_the_system_clock() {
    let store = MemoryWindowStore::new();
    let rule = Rule::new(1, Duration::from_millis(200)).unwrap();

    assert!(store.check_and_update(&rule, "u3").await.unwrap());
    assert!(!store.check_and_update(&rule, "u3").await.unwrap());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(store.check_and_update(&rule, "u3").await.unwrap());
}

#[tokio::test]
async fn test_identifiers_are_independent() {
    let (store, _clock) = clocked_store();
    let rule = Rule::per_seconds(1, 10).unwrap();

    assert!(store.check_and_update(&rule, "user-A").await.unwrap());
    assert!(!store.check_and_update(&rule, "user-A").await.unwrap());
    assert!(store.check_and_update(&rule, "user-B").await.unwrap());
}

#[tokio::test]
async fn test_limiter_short_circuits_on_strict_rule() {
    let (store, _clock) = clocked_store();
    let strict = Rule::per_seconds(1, 10).unwrap();
    let soft = Rule::per_seconds(100, 60).unwrap();

    let limiter = RateLimiter::new(store.clone(), [soft, strict]).unwrap();

    assert!(limiter.is_allowed("client").await.unwrap());
    assert_eq!(
        limiter.check("client").await.unwrap(),
        Decision::Denied { rule: strict }
    );

    // The denied call never reached the looser rule.
    assert_eq!(store.count(&strict, "client").await.unwrap(), 2);
    assert_eq!(store.count(&soft, "client").await.unwrap(), 1);
}

#[tokio::test]
async fn test_limiters_share_one_store() {
    let (store, _clock) = clocked_store();
    let rule = Rule::per_seconds(3, 10).unwrap();

    let first = RateLimiter::new(store.clone(), [rule]).unwrap();
    let second = RateLimiter::new(store.clone(), [rule]).unwrap();

    assert!(first.is_allowed("shared").await.unwrap());
    assert!(second.is_allowed("shared").await.unwrap());
    assert!(first.is_allowed("shared").await.unwrap());
    assert!(!second.is_allowed("shared").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_admit_exactly_limit() {
    let store = Arc::new(MemoryWindowStore::new());
    let rule = Rule::per_seconds(10, 60).unwrap();

    let tasks = (0..50).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.check_and_update(&rule, "burst").await })
    });

    let admitted = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|allowed| *allowed)
        .count();

    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn test_closed_store_surfaces_error_through_limiter() {
    let (store, _clock) = clocked_store();
    let limiter = RateLimiter::new(store.clone(), [Rule::per_seconds(1, 1).unwrap()]).unwrap();

    store.close().await.unwrap();

    let err = limiter.is_allowed("late").await.unwrap_err();
    assert!(matches!(err, RatewardenError::StoreClosed));
}

#[test]
fn test_invalid_construction() {
    assert!(Rule::per_seconds(0, 10).is_err());
    assert!(Rule::new(1, Duration::ZERO).is_err());

    let store = Arc::new(MemoryWindowStore::new());
    assert!(matches!(
        RateLimiter::new(store, Vec::<Rule>::new()),
        Err(RatewardenError::EmptyRuleSet)
    ));
}
