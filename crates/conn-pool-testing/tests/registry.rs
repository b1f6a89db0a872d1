//! Registry integration tests.
//!
//! These exercise the full register / checkout / check-in / destroy cycle
//! against mock connections that record every close.
//!
//! ```bash
//! cargo test -p conn-pool-testing --test registry
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use conn_pool::{PoolConfig, PoolError, Registry};
use conn_pool_testing::{MockBehavior, MockConnection, MockError, MockFactory};

fn registry() -> Registry<MockConnection> {
    Registry::builder()
        .refresh_probability(0)
        .seed(1)
        .build()
        .unwrap()
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_register_duplicate_leaves_pool_unchanged() {
    let registry = registry();
    let original = MockFactory::new("original");
    let intruder = MockFactory::new("intruder");

    registry.register("svc-a", original.clone(), 2).unwrap();
    let conn = registry.checkout("svc-a").await.unwrap();
    registry.check_in("svc-a", conn).unwrap();
    let before = registry.status("svc-a").unwrap();

    let err = registry.register("svc-a", intruder.clone(), 10).unwrap_err();
    assert!(matches!(err, PoolError::AlreadyExists(ref d) if d == "svc-a"));

    assert_eq!(registry.status("svc-a").unwrap(), before);
    assert_eq!(registry.len(), 1);

    // Still served by the first factory.
    let conn = registry.checkout("svc-a").await.unwrap();
    assert_eq!(conn.label(), "original");
    let fresh = registry.checkout("svc-a").await.unwrap();
    assert_eq!(fresh.label(), "original");
    assert_eq!(intruder.connects(), 0);
}

// =============================================================================
// Checkout / check-in
// =============================================================================

#[tokio::test]
async fn test_unbounded_round_trip_preserves_fifo() {
    let registry = registry();
    let factory = MockFactory::new("svc");
    registry.register("svc", factory.clone(), 0).unwrap();

    let mut conns = Vec::new();
    for _ in 0..5 {
        conns.push(registry.checkout("svc").await.unwrap());
    }
    assert_eq!(factory.connects(), 5);

    for conn in conns {
        registry.check_in("svc", conn).unwrap();
    }
    assert_eq!(registry.status("svc").unwrap().idle, 5);

    let mut order = Vec::new();
    for _ in 0..5 {
        order.push(registry.checkout("svc").await.unwrap().id());
    }
    assert_eq!(order, vec![1, 2, 3, 4, 5]);
    assert_eq!(factory.connects(), 5);
}

#[tokio::test]
async fn test_capacity_bound_closes_excess() {
    let registry = registry();
    let factory = MockFactory::new("svc");
    registry.register("svc", factory.clone(), 3).unwrap();

    let mut conns = Vec::new();
    for _ in 0..7 {
        conns.push(registry.checkout("svc").await.unwrap());
    }
    for conn in conns {
        registry.check_in("svc", conn).unwrap();
        assert!(registry.status("svc").unwrap().idle <= 3);
    }

    let status = registry.status("svc").unwrap();
    assert_eq!(status.idle, 3);
    assert!(status.is_at_capacity());
    assert_eq!(factory.log().closed(), vec![4, 5, 6, 7]);

    let metrics = registry.metrics("svc").unwrap();
    assert_eq!(metrics.checkins, 3);
    assert_eq!(metrics.discarded, 4);
}

#[tokio::test]
async fn test_checkout_on_empty_pool_calls_factory_once() {
    let registry = registry();
    let factory = MockFactory::new("svc");
    registry.register("svc", factory.clone(), 2).unwrap();

    let conn = registry.checkout("svc").await.unwrap();
    assert_eq!(conn.id(), 1);
    assert_eq!(factory.connects(), 1);
}

#[tokio::test]
async fn test_factory_error_is_returned_verbatim() {
    let registry = registry();
    let factory = MockFactory::failing("svc", "connection refused");
    registry.register("svc", factory.clone(), 2).unwrap();

    let err = registry.checkout("svc").await.unwrap_err();
    assert!(err.is_transient());
    let source = err.factory_source().expect("factory error");
    assert_eq!(
        source.downcast_ref::<MockError>(),
        Some(&MockError("connection refused".to_string()))
    );
    assert_eq!(factory.connects(), 1);

    let metrics = registry.metrics("svc").unwrap();
    assert_eq!(metrics.checkouts_failed, 1);
    assert_eq!(metrics.checkouts_successful, 0);
}

#[tokio::test]
async fn test_refresh_replaces_idle_connection() {
    let registry: Registry<MockConnection> = Registry::builder().seed(3).build().unwrap();
    let factory = MockFactory::new("svc");
    registry
        .register_with_config(
            "svc",
            factory.clone(),
            PoolConfig::new().refresh_probability(100),
        )
        .unwrap();

    let conn = registry.checkout("svc").await.unwrap();
    registry.check_in("svc", conn).unwrap();

    let fresh = registry.checkout("svc").await.unwrap();
    assert_eq!(fresh.id(), 2);
    assert_eq!(factory.log().closed(), vec![1]);
    assert_eq!(registry.metrics("svc").unwrap().refreshes, 1);
}

#[tokio::test]
async fn test_failed_refresh_loses_only_the_popped_connection() {
    let registry = registry();
    let factory = MockFactory::new("svc");
    registry
        .register_with_config(
            "svc",
            factory.clone(),
            PoolConfig::new().refresh_probability(100),
        )
        .unwrap();

    let a = registry.checkout("svc").await.unwrap();
    let b = registry.checkout("svc").await.unwrap();
    registry.check_in("svc", a).unwrap();
    registry.check_in("svc", b).unwrap();

    factory.set_behavior(MockBehavior::Fail("down".to_string()));
    let err = registry.checkout("svc").await.unwrap_err();
    assert!(matches!(err, PoolError::Factory(_)));

    assert_eq!(factory.log().closed(), vec![1]);
    assert_eq!(registry.status("svc").unwrap().idle, 1);
}

#[tokio::test]
async fn test_connect_timeout() {
    let registry: Registry<MockConnection> = Registry::builder()
        .refresh_probability(0)
        .connect_timeout(Duration::from_millis(20))
        .build()
        .unwrap();
    let factory = MockFactory::new("svc");
    factory.set_behavior(MockBehavior::Delay(Duration::from_secs(30)));
    registry.register("svc", factory, 1).unwrap();

    let err = registry.checkout("svc").await.unwrap_err();
    assert!(matches!(err, PoolError::Timeout(_)));
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_destroy_closes_idle_exactly_once() {
    let registry = registry();
    let factory = MockFactory::new("svc");
    registry.register("svc", factory.clone(), 0).unwrap();

    let a = registry.checkout("svc").await.unwrap();
    let b = registry.checkout("svc").await.unwrap();
    let outstanding = registry.checkout("svc").await.unwrap();
    registry.check_in("svc", a).unwrap();
    registry.check_in("svc", b).unwrap();

    registry.destroy("svc").unwrap();
    let log = factory.log();
    assert_eq!(log.count(), 2);
    assert_eq!(log.times_closed(1), 1);
    assert_eq!(log.times_closed(2), 1);
    assert_eq!(log.times_closed(3), 0);

    assert!(matches!(
        registry.checkout("svc").await,
        Err(PoolError::NotFound(_))
    ));
    assert!(matches!(registry.destroy("svc"), Err(PoolError::NotFound(_))));

    // Returning a connection after teardown closes it.
    assert!(matches!(
        registry.check_in("svc", outstanding),
        Err(PoolError::NotFound(_))
    ));
    assert_eq!(log.times_closed(3), 1);

    drop(registry);
    assert_eq!(log.count(), 3);
}

#[tokio::test]
async fn test_scenario() {
    let registry = registry();
    let factory = MockFactory::new("svc-a");

    registry.register("svc-a", factory.clone(), 2).unwrap();

    let c1 = registry.checkout("svc-a").await.unwrap();
    assert_eq!(factory.connects(), 1);

    registry.check_in("svc-a", c1).unwrap();
    assert_eq!(registry.status("svc-a").unwrap().idle, 1);

    let c1 = registry.checkout("svc-a").await.unwrap();
    assert_eq!(c1.id(), 1);
    assert_eq!(registry.status("svc-a").unwrap().idle, 0);

    registry.destroy("svc-a").unwrap();
    assert_eq!(factory.log().count(), 0);

    assert!(matches!(
        registry.checkout("svc-a").await,
        Err(PoolError::NotFound(ref d)) if d == "svc-a"
    ));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_descriptors_do_not_mix() {
    let registry = Arc::new(registry());
    for name in ["svc-a", "svc-b"] {
        registry.register(name, MockFactory::new(name), 4).unwrap();
    }

    let mut handles = Vec::new();
    for task in 0..16 {
        let registry = Arc::clone(&registry);
        let name = if task % 2 == 0 { "svc-a" } else { "svc-b" };
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                let conn = registry.checkout(name).await.unwrap();
                assert_eq!(conn.label(), name);
                tokio::task::yield_now().await;
                registry.check_in(name, conn).unwrap();
            }
        }));
    }

    for handle in handles {
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("checkout loop deadlocked")
            .unwrap();
    }

    for name in ["svc-a", "svc-b"] {
        assert!(registry.status(name).unwrap().idle <= 4);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_factory_does_not_block_other_descriptors() {
    let registry = Arc::new(registry());
    let slow = MockFactory::new("slow");
    slow.set_behavior(MockBehavior::Gated);
    registry.register("slow", slow.clone(), 1).unwrap();
    registry.register("fast", MockFactory::new("fast"), 1).unwrap();

    let pending = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.checkout("slow").await.map(|c| c.id()) }
    });

    // Let the slow checkout reach its factory.
    while slow.connects() == 0 {
        tokio::task::yield_now().await;
    }

    let fast = tokio::time::timeout(Duration::from_secs(5), registry.checkout("fast"))
        .await
        .expect("fast checkout blocked behind slow factory")
        .unwrap();
    assert_eq!(fast.label(), "fast");

    registry.register("late", MockFactory::new("late"), 1).unwrap();
    assert!(registry.contains("late"));

    slow.release();
    assert_eq!(pending.await.unwrap().unwrap(), 1);
}
