//! Sweep triggers and shutdown of the cleaner.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use common::config::{CleanerConfig, CleanerMode};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::error::{CleanerError, Result};
use crate::sweep::Cleaner;

/// What starts a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A single sweep
    Once,
    /// A sweep on start, then one per period until shutdown
    Interval(Duration),
    /// A sweep per `POST /` on the given address
    Http(SocketAddr),
}

impl Trigger {
    pub fn from_config(config: &CleanerConfig, host: &str) -> Result<Self> {
        Ok(match config.mode {
            CleanerMode::Once => Trigger::Once,
            CleanerMode::Interval => Trigger::Interval(config.interval),
            CleanerMode::Http => {
                let addr = format!("{host}:{}", config.port);
                Trigger::Http(addr.parse().map_err(|e| {
                    CleanerError::Server(format!("invalid listen address {addr}: {e}"))
                })?)
            }
        })
    }
}

/// Run sweeps for `trigger` until done or until the cleaner shuts down
pub async fn run(cleaner: Arc<Cleaner>, trigger: Trigger) -> Result<()> {
    match trigger {
        Trigger::Once => {
            info!("Running cleaner once");
            cleaner.sweep().await.map(|_| ())
        }
        Trigger::Interval(period) => run_interval(cleaner, period).await,
        Trigger::Http(addr) => run_http(cleaner, addr).await,
    }
}

async fn run_interval(cleaner: Arc<Cleaner>, period: Duration) -> Result<()> {
    let cancel = cleaner.cancellation_token();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = period.as_secs(), "Running cleaner on an interval");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Cleaner schedule has been cancelled");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(e) = cleaner.sweep().await {
                    error!(error = %e, "Sweep failed");
                }
            }
        }
    }
}

/// Trigger listener: `POST /` sweeps, `GET /health` answers liveness
pub fn router(cleaner: Arc<Cleaner>) -> Router {
    Router::new()
        .route("/", post(trigger_sweep))
        .route("/health", get(health))
        .with_state(cleaner)
}

async fn trigger_sweep(State(cleaner): State<Arc<Cleaner>>) -> (StatusCode, &'static str) {
    info!("Sweep triggered over HTTP");
    match cleaner.sweep().await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => {
            error!(error = %e, "Sweep failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Sweep failed, check server logs")
        }
    }
}

async fn health() -> &'static str {
    "UP"
}

async fn run_http(cleaner: Arc<Cleaner>, addr: SocketAddr) -> Result<()> {
    let cancel = cleaner.cancellation_token();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CleanerError::Server(format!("failed to bind {addr}: {e}")))?;

    info!(%addr, "Cleaner is ready to handle sweep requests");
    axum::serve(listener, router(cleaner).into_make_service())
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("Cleaner listener shutting down gracefully");
        })
        .await
        .map_err(|e| CleanerError::Server(e.to_string()))
}

/// Cancel the cleaner and wait up to `deadline` for its task to drain
pub async fn shutdown(
    cleaner: &Cleaner,
    handle: JoinHandle<Result<()>>,
    deadline: Duration,
) -> Result<()> {
    info!("Cleaner is shutting down");
    cleaner.shutdown();

    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(CleanerError::Server(format!("cleaner task failed: {e}"))),
        Err(_) => Err(CleanerError::ShutdownTimeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use bytes::Bytes;
    use common::config::PoolConfig;
    use common::storage::ObjectBucket;
    use std::collections::BTreeMap;
    use store::Store;
    use tower::ServiceExt;

    async fn cleaner_with_tombstoned_table() -> Arc<Cleaner> {
        let store = Arc::new(Store::new(
            Arc::new(ObjectBucket::in_memory()),
            "bigbucket",
            PoolConfig::default(),
        ));
        let values = BTreeMap::from([("col1".to_string(), Bytes::from("v"))]);
        store.set_row("t1", "key1", values).await.unwrap();
        store.delete_table("t1").await.unwrap();

        Arc::new(Cleaner::new(
            store,
            &CleanerConfig::default(),
            &PoolConfig::default(),
        ))
    }

    #[test]
    fn test_trigger_from_config() {
        let mut config = CleanerConfig::default();
        assert_eq!(
            Trigger::from_config(&config, "127.0.0.1").unwrap(),
            Trigger::Interval(Duration::from_secs(60))
        );

        config.mode = CleanerMode::Http;
        assert_eq!(
            Trigger::from_config(&config, "127.0.0.1").unwrap(),
            Trigger::Http("127.0.0.1:8081".parse().unwrap())
        );
        assert!(Trigger::from_config(&config, "not a host").is_err());
    }

    #[tokio::test]
    async fn test_post_runs_sweep() {
        let cleaner = cleaner_with_tombstoned_table().await;
        let app = router(cleaner.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
        assert!(cleaner.store().tombstoned_tables().await.is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let cleaner = cleaner_with_tombstoned_table().await;
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = router(cleaner).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"UP");
    }

    #[tokio::test]
    async fn test_interval_sweeps_on_start_and_stops_on_shutdown() {
        let cleaner = cleaner_with_tombstoned_table().await;
        let handle = tokio::spawn(run(
            cleaner.clone(),
            Trigger::Interval(Duration::from_secs(3600)),
        ));

        for _ in 0..100 {
            if cleaner.store().tombstoned_tables().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cleaner.store().tombstoned_tables().await.is_empty());

        shutdown(&cleaner, handle, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_task() {
        let cleaner = cleaner_with_tombstoned_table().await;
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let err = shutdown(&cleaner, handle, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CleanerError::ShutdownTimeout(_)));
        assert!(cleaner.is_shutting_down());
    }
}
