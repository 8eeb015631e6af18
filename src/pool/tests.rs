//! Tests for the connection pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::*;
use crate::testing::{FakeServer, FakeServerOptions, RecordingExecutor};

fn config_for(server: &FakeServer) -> PoolConfig {
    let endpoint = server.endpoint();
    PoolConfig::new(&endpoint.host, endpoint.port, "TestDB")
}

async fn open(config: PoolConfig) -> (ConnectionPool, Arc<RecordingExecutor>) {
    let executor = Arc::new(RecordingExecutor::new());
    let pool = ConnectionPool::connect(config, executor.clone())
        .await
        .unwrap();
    (pool, executor)
}

mod acquisition {
    use super::*;

    #[tokio::test]
    async fn test_bounded_pool_times_out() {
        let server = FakeServer::start().await;
        let (pool, _) = open(
            config_for(&server)
                .max_connections(1)
                .login_timeout_secs(1),
        )
        .await;

        let _held = pool.acquire().await.unwrap();

        let started = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::LockTimeout(_)));
        assert!(elapsed >= Duration::from_millis(900), "gave up after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "gave up after {:?}", elapsed);

        // A timeout leaves the pool as it was
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.available_count(), 0);
        assert_eq!(server.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_warm_pool_serves_up_to_max() {
        let server = FakeServer::start().await;
        let (pool, _) = open(
            config_for(&server)
                .initial_connections(2)
                .max_connections(2)
                .login_timeout_secs(5),
        )
        .await;
        assert_eq!(server.handshakes(), 2);
        assert_eq!(pool.available_count(), 2);

        let started = Instant::now();
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_ne!(first, second);
        assert_eq!(server.handshakes(), 2);

        let started = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(4900));
    }

    #[tokio::test]
    async fn test_pool_grows_to_max() {
        let server = FakeServer::start().await;
        let (pool, _) = open(
            config_for(&server)
                .initial_connections(0)
                .max_connections(3)
                .login_timeout_secs(1),
        )
        .await;
        assert_eq!(server.handshakes(), 0);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use_count(), 3);
        assert_eq!(server.handshakes(), 3);
        assert!(matches!(pool.acquire().await, Err(Error::LockTimeout(_))));

        drop((a, b, c));
    }

    #[tokio::test]
    async fn test_release_wakes_waiter() {
        let server = FakeServer::start().await;
        let (pool, _) = open(config_for(&server).max_connections(1)).await;

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        let released = Instant::now();
        held.close().await.unwrap();
        let handle = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(released.elapsed() < Duration::from_millis(900));
        assert!(!handle.is_closed());
        assert!(held.is_closed());
        assert_eq!(server.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_release_wakes_one_of_two_waiters() {
        let server = FakeServer::start().await;
        let (pool, _) = open(
            config_for(&server)
                .max_connections(1)
                .login_timeout_secs(2),
        )
        .await;

        let held = pool.acquire().await.unwrap();
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;

        held.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let (done, blocked): (Vec<_>, Vec<_>) =
            waiters.into_iter().partition(|waiter| waiter.is_finished());
        assert_eq!(done.len(), 1);
        assert_eq!(blocked.len(), 1);

        // The winner keeps its handle, so the other one runs out of time
        let _winner = done.into_iter().next().unwrap().await.unwrap().unwrap();
        let loser = blocked.into_iter().next().unwrap().await.unwrap();
        assert!(matches!(loser, Err(Error::LockTimeout(_))));
        assert_eq!(server.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_handshake_frees_its_slot() {
        let server = FakeServer::start_with(FakeServerOptions {
            stalled_handshakes: 1,
            ..FakeServerOptions::default()
        })
        .await;
        let (pool, _) = open(
            config_for(&server)
                .initial_connections(0)
                .max_connections(1)
                .login_timeout_secs(1),
        )
        .await;

        let cancelled = tokio::time::timeout(Duration::from_millis(200), pool.acquire()).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.inner.state.lock().pending, 0);
        assert_eq!(pool.in_use_count(), 0);

        let handle = pool.acquire().await.unwrap();
        assert!(!handle.is_closed());
        assert_eq!(server.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_reuse_gives_back_capacity() {
        let server = FakeServer::start().await;
        let (pool, executor) = open(
            config_for(&server)
                .max_connections(1)
                .login_timeout_secs(1),
        )
        .await;

        let handle = pool.acquire().await.unwrap();
        handle.set_auto_commit(false).await.unwrap();
        handle.close().await.unwrap();

        // Handing the session out again rolls back once more, and that hangs
        executor.delay_on("ROLLBACK", Duration::from_secs(30));
        let cancelled = tokio::time::timeout(Duration::from_millis(200), pool.acquire()).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.available_count(), 0);

        let fresh = tokio::time::timeout(Duration::from_secs(2), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(fresh.identity(), handle.identity());
        assert_eq!(server.handshakes(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_pool_discards_on_close() {
        let server = FakeServer::start().await;
        let (pool, _) = open(
            config_for(&server)
                .initial_connections(0)
                .max_connections(0),
        )
        .await;

        for _ in 0..2 {
            let handle = pool.acquire().await.unwrap();
            handle.close().await.unwrap();
        }

        assert_eq!(server.handshakes(), 2);
        assert_eq!(server.ended_sessions(), 2);
        assert_eq!(pool.available_count(), 0);
        assert_eq!(pool.in_use_count(), 0);
    }
}

mod reclamation {
    use super::*;

    #[tokio::test]
    async fn test_closed_handle_is_recycled() {
        let server = FakeServer::start().await;
        let (pool, _) = open(config_for(&server).max_connections(2)).await;

        let handle = pool.acquire().await.unwrap();
        let identity = handle.identity();
        assert_eq!(pool.in_use_count(), 1);

        handle.close().await.unwrap();
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.available_count(), 1);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.identity(), identity);
        assert_eq!(server.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_is_recycled() {
        let server = FakeServer::start().await;
        let (pool, _) = open(config_for(&server).max_connections(1)).await;

        drop(pool.acquire().await.unwrap());

        for _ in 0..50 {
            if pool.available_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.available_count(), 1);
        assert_eq!(pool.in_use_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_evicts_session() {
        let server = FakeServer::start().await;
        let (pool, executor) = open(config_for(&server).max_connections(1)).await;
        executor.fail_on("KILL", "08S01");

        let handle = pool.acquire().await.unwrap();
        let err = handle.execute("KILL SESSION").await.unwrap_err();
        assert!(err.is_fatal());

        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.available_count(), 0);
        assert_eq!(server.ended_sessions(), 1);

        // The freed slot is usable straight away
        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.identity().slave_id, handle.identity().slave_id);
        assert_eq!(server.handshakes(), 2);
    }

    #[tokio::test]
    async fn test_non_fatal_error_keeps_session() {
        let server = FakeServer::start().await;
        let (pool, executor) = open(config_for(&server).max_connections(1)).await;
        executor.fail_on("SELEC ", "42000");

        let handle = pool.acquire().await.unwrap();
        assert!(handle.execute("SELEC 1").await.is_err());
        assert_eq!(pool.in_use_count(), 1);

        handle.close().await.unwrap();
        assert_eq!(pool.available_count(), 1);
        assert_eq!(server.ended_sessions(), 0);
    }

    #[tokio::test]
    async fn test_reuse_rolls_back_open_transaction() {
        let server = FakeServer::start().await;
        let (pool, executor) = open(config_for(&server).max_connections(1)).await;

        let handle = pool.acquire().await.unwrap();
        handle.set_auto_commit(false).await.unwrap();
        handle.execute("UPDATE t SET x = 1").await.unwrap();
        handle.close().await.unwrap();

        // Nothing stays open while the session sits idle
        assert_eq!(executor.statements(), vec!["UPDATE t SET x = 1", "ROLLBACK"]);
        assert_eq!(pool.available_count(), 1);

        let handle = pool.acquire().await.unwrap();
        assert!(handle.auto_commit().await.unwrap());
        assert_eq!(
            executor.statements(),
            vec!["UPDATE t SET x = 1", "ROLLBACK", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_fatal_rollback_on_close_evicts_session() {
        let server = FakeServer::start().await;
        let (pool, executor) = open(config_for(&server).max_connections(1)).await;
        executor.fail_on("ROLLBACK", "08S01");

        let handle = pool.acquire().await.unwrap();
        handle.set_auto_commit(false).await.unwrap();
        assert!(handle.close().await.is_err());

        assert_eq!(pool.available_count(), 0);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(server.ended_sessions(), 1);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_close_drains_everything() {
        let server = FakeServer::start().await;
        let (pool, _) = open(
            config_for(&server)
                .initial_connections(2)
                .max_connections(3),
        )
        .await;
        let handle = pool.acquire().await.unwrap();

        pool.close().await;
        pool.close().await;

        assert!(pool.is_closed());
        assert!(handle.is_closed());
        assert_eq!(pool.available_count(), 0);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(server.ended_sessions(), 2);
        assert!(matches!(pool.acquire().await, Err(Error::Unexpected(_))));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let server = FakeServer::start().await;
        let (pool, _) = open(config_for(&server).max_connections(1)).await;
        let _held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        pool.close().await;
        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Unexpected(_))));
    }

    #[tokio::test]
    async fn test_named_pool_is_registered_until_closed() {
        let server = FakeServer::start().await;
        let (pool, _) = open(config_for(&server).name("pool-lifecycle-test")).await;

        assert_eq!(ConnectionPool::lookup("pool-lifecycle-test"), Some(pool.clone()));
        assert!(PoolRegistry::global()
            .names()
            .contains(&"pool-lifecycle-test".to_string()));

        pool.close().await;
        assert!(ConnectionPool::lookup("pool-lifecycle-test").is_none());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = PoolConfig::new("127.0.0.1", port, "TestDB").name("pool-unreachable-test");
        let executor = Arc::new(RecordingExecutor::new());
        let err = ConnectionPool::connect(config, executor).await.unwrap_err();

        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert!(ConnectionPool::lookup("pool-unreachable-test").is_none());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let config = PoolConfig::new("127.0.0.1", 1, "TestDB")
            .initial_connections(5)
            .max_connections(2);
        let executor = Arc::new(RecordingExecutor::new());
        assert!(matches!(
            ConnectionPool::connect(config, executor).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_config_is_copied() {
        let server = FakeServer::start().await;
        let config = config_for(&server).max_connections(4);
        let (pool, _) = open(config.clone()).await;
        assert_eq!(pool.config(), &config);
    }
}
