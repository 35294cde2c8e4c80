//! Embedded HTTP endpoint probed by the coordination store's health checker.

use anyhow::{bail, Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Path registered with the store's health checker.
pub const HEALTH_CHECK_PATH: &str = "/healthz";

#[derive(Clone)]
struct HealthState {
    /// Failure injection: report 503 instead of 200.
    unhealthy: bool,
}

/// Running health endpoint; stopped with a bounded grace period during
/// service shutdown.
pub struct HealthServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl HealthServer {
    /// Binds the listener and starts serving. Port 0 picks an ephemeral
    /// port.
    pub async fn start(port: u16, unhealthy: bool) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind health endpoint on port {}", port))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read health endpoint address")?;

        let app = Router::new()
            .route(HEALTH_CHECK_PATH, any(healthz))
            .with_state(HealthState { unhealthy });

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        });

        tracing::info!(addr = %local_addr, "health endpoint listening");
        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    /// Signals the server to drain and waits for it to finish within the
    /// grace period.
    pub async fn stop(self, grace: Duration) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!(addr = %self.local_addr, "health endpoint stopped");
                Ok(())
            }
            Ok(Ok(Err(error))) => Err(error).context("health endpoint exited with an error"),
            Ok(Err(join_error)) => {
                Err(join_error).context("health endpoint task panicked or was aborted")
            }
            Err(_) => bail!("health endpoint did not drain within {:?}", grace),
        }
    }
}

async fn healthz(State(state): State<HealthState>, request: Request) -> impl IntoResponse {
    let status = if request.method() != Method::GET {
        StatusCode::METHOD_NOT_ALLOWED
    } else if state.unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let status_text = status.canonical_reason().unwrap_or("");
    tracing::info!(
        "\"{} {} {:?}\" {} {}",
        request.method(),
        request.uri().path(),
        request.version(),
        status.as_u16(),
        status_text,
    );

    let body = if status == StatusCode::OK {
        "OK"
    } else {
        status_text
    };
    (status, [(header::CONTENT_TYPE, "text/plain")], body)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started(unhealthy: bool) -> (HealthServer, String) {
        let server = HealthServer::start(0, unhealthy).await.unwrap();
        let url = format!(
            "http://127.0.0.1:{}{}",
            server.local_addr.port(),
            HEALTH_CHECK_PATH
        );
        (server, url)
    }

    #[tokio::test]
    async fn get_healthz_reports_ok() {
        let (server, url) = started(false).await;

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "text/plain"
        );
        assert_eq!(response.text().await.unwrap(), "OK");

        server.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn non_get_method_is_rejected_with_a_body() {
        let (server, url) = started(false).await;

        let response = reqwest::Client::new().post(&url).send().await.unwrap();
        assert_eq!(response.status(), 405);
        let body = response.text().await.unwrap();
        assert!(!body.is_empty());

        server.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn failure_injection_reports_unavailable() {
        let (server, url) = started(true).await;

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 503);
        assert!(!response.text().await.unwrap().is_empty());

        server.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let (server, url) = started(false).await;
        let root = url.trim_end_matches(HEALTH_CHECK_PATH).to_string();

        let response = reqwest::get(format!("{}/other", root)).await.unwrap();
        assert_eq!(response.status(), 404);

        server.stop(Duration::from_secs(5)).await.unwrap();
    }
}
