//! Many concurrent callers against a small pool

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use sqlmux_auth::WarehouseAuthenticator;
use sqlmux_pool::PoolManager;
use tests::{AuthMethod, PoolSettings, TargetIdentity, WarehouseMock};

const MAX_POOL_SIZE: usize = 4;
const CALLERS: usize = 32;
const ROUNDS: usize = 5;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_exceed_capacity() {
    let warehouse = WarehouseMock::start().await;
    let logins = warehouse.mount_counting_login().await;

    let pool = Arc::new(PoolManager::new(Arc::new(WarehouseAuthenticator::new())));
    let identity = TargetIdentity::new("acme", "etl");
    let config = warehouse.config(AuthMethod::password("pw")).with_pool(
        PoolSettings::default()
            .with_max_pool_size(MAX_POOL_SIZE)
            .with_connection_timeout(Duration::from_secs(20)),
    );

    let held = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let callers = (0..CALLERS).map(|_| {
        let pool = pool.clone();
        let identity = identity.clone();
        let config = config.clone();
        let held = held.clone();
        let peak = peak.clone();
        tokio::spawn(async move {
            for _ in 0..ROUNDS {
                let session = pool.acquire(&identity, &config, None).await?;
                let now_held = held.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now_held, Ordering::SeqCst);

                tokio::time::sleep(Duration::from_millis(2)).await;

                held.fetch_sub(1, Ordering::SeqCst);
                pool.release(session);
            }
            Ok::<_, tests::PoolError>(())
        })
    });

    for result in join_all(callers).await {
        result.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= MAX_POOL_SIZE);
    assert!(logins.issued() <= MAX_POOL_SIZE);

    let entry = pool.statistics().entries.remove(0);
    assert_eq!(entry.active, 0);
    assert_eq!(entry.in_flight, 0);
    assert_eq!(entry.created + entry.reused, (CALLERS * ROUNDS) as u64);
    assert_eq!(entry.idle as u64, entry.created - entry.closed);
    assert_eq!(entry.auth_failures, 0);
    assert_eq!(entry.timeouts, 0);

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeouts_under_contention_leak_no_capacity() {
    let warehouse = WarehouseMock::start().await;
    warehouse.mount_counting_login().await;

    let pool = Arc::new(PoolManager::new(Arc::new(WarehouseAuthenticator::new())));
    let identity = TargetIdentity::new("acme", "etl");
    let config = warehouse
        .config(AuthMethod::password("pw"))
        .with_pool(PoolSettings::default().with_max_pool_size(2));

    let a = pool.acquire(&identity, &config, None).await.unwrap();
    let b = pool.acquire(&identity, &config, None).await.unwrap();

    let waiters = (0..8).map(|_| {
        let pool = pool.clone();
        let identity = identity.clone();
        let config = config.clone();
        tokio::spawn(async move {
            pool.acquire(&identity, &config, Some(Duration::from_millis(50)))
                .await
                .map(|session| session.id())
        })
    });
    let timed_out = join_all(waiters)
        .await
        .into_iter()
        .filter(|r| r.as_ref().unwrap().is_err())
        .count();
    assert_eq!(timed_out, 8);

    pool.release(a);
    pool.release(b);

    // Both slots are usable again
    let c = pool.acquire(&identity, &config, None).await.unwrap();
    let d = pool.acquire(&identity, &config, None).await.unwrap();
    assert!(c.was_reused() && d.was_reused());

    let entry = pool.statistics().entries.remove(0);
    assert_eq!(entry.timeouts, 8);
    assert_eq!(entry.created, 2);
    assert_eq!(entry.active, 2);
}
