//! The fetch relay: downloads images on behalf of the page agent and returns them as base64
//! data URLs, so the capture never has to read cross-origin bytes itself.
//!
//! The relay answers over two transports carrying the same JSON messages: an in-process
//! channel ([`spawn`]) and HTTP ([`router`] / [`serve`]).

use std::net::SocketAddr;

use anyhow::Context as _;
use async_trait::async_trait;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use reqwest::header::CONTENT_TYPE;
use tower_http::trace::TraceLayer;

use crate::messages::{self, RelayRequest, RelayResponse};
use crate::{data_url, site};

pub const MISSING_URL: &str = "Missing imageUrl";
pub const FETCH_FAILED: &str = "Failed to fetch/process image in background";
pub const RELAY_UNAVAILABLE: &str = "Fetch relay is not available for image fetch.";

/// Anything the page agent can ask for an inlined image.
#[async_trait]
pub trait ImageRelay: Send + Sync {
    async fn fetch_image_as_base64(&self, image_url: &str) -> RelayResponse;
}

#[derive(Debug, Clone)]
pub struct FetchRelay {
    client: reqwest::Client,
}

impl FetchRelay {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        match request {
            RelayRequest::FetchImageAsBase64 { image_url } => self.fetch_image(&image_url).await,
        }
    }

    /// One GET, no retry. Every failure is folded into the response.
    pub async fn fetch_image(&self, image_url: &str) -> RelayResponse {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            tracing::error!("relay request without image url");
            return RelayResponse::failed(MISSING_URL, None);
        }

        let url = site::normalize_image_url(image_url);
        tracing::debug!(url = %url, "relay image fetch");
        match self.fetch_data_url(&url).await {
            Ok(data_url) => {
                tracing::debug!(url = %url, length = data_url.len(), "image inlined");
                RelayResponse::data_url(data_url)
            }
            Err(err) => {
                let details = format!("{err:#}");
                tracing::warn!(url = %url, error = %details, "image fetch failed");
                RelayResponse::failed(FETCH_FAILED, Some(details))
            }
        }
    }

    async fn fetch_data_url(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Network error: {status}");
        }

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("application/octet-stream")
            .to_owned();
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("read image body: {url}"))?;
        if bytes.is_empty() {
            tracing::warn!(url, "image body is empty");
        }

        Ok(data_url::encode(&mime, &bytes))
    }
}

#[async_trait]
impl ImageRelay for FetchRelay {
    async fn fetch_image_as_base64(&self, image_url: &str) -> RelayResponse {
        self.fetch_image(image_url).await
    }
}

/// In-process client of a relay started with [`spawn`].
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: messages::Sender<RelayRequest, RelayResponse>,
}

#[async_trait]
impl ImageRelay for RelayHandle {
    async fn fetch_image_as_base64(&self, image_url: &str) -> RelayResponse {
        let request = RelayRequest::FetchImageAsBase64 {
            image_url: image_url.to_owned(),
        };
        match messages::call(&self.tx, request).await {
            Ok(response) => response,
            Err(err) => RelayResponse::failed(RELAY_UNAVAILABLE, Some(err.to_string())),
        }
    }
}

/// Runs the relay as a task that answers one request at a time.
pub fn spawn(relay: FetchRelay) -> (RelayHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = messages::channel::<RelayRequest, RelayResponse>(8);
    let task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let (request, responder) = envelope.into_parts();
            let response = relay.handle(request).await;
            if !responder.respond(response) {
                tracing::debug!("relay caller stopped waiting");
            }
        }
        tracing::debug!("fetch relay stopped");
    });
    (RelayHandle { tx }, task)
}

pub fn router(relay: FetchRelay) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/message", post(handle_message))
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

async fn handle_message(
    State(relay): State<FetchRelay>,
    Json(request): Json<RelayRequest>,
) -> Json<RelayResponse> {
    Json(relay.handle(request).await)
}

pub async fn serve(listen: SocketAddr, relay: FetchRelay) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|err| anyhow::anyhow!("bind {listen}: {err}"))?;
    tracing::info!(addr = %listen, "fetch relay listening");
    axum::serve(listener, router(relay))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

/// Client of a relay served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRelay {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        Self {
            client,
            endpoint: format!("{base_url}/message"),
        }
    }

    async fn post(&self, request: &RelayRequest) -> anyhow::Result<RelayResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("fetch relay answered {status}");
        }
        response.json().await.context("parse relay response")
    }
}

#[async_trait]
impl ImageRelay for HttpRelay {
    async fn fetch_image_as_base64(&self, image_url: &str) -> RelayResponse {
        let request = RelayRequest::FetchImageAsBase64 {
            image_url: image_url.to_owned(),
        };
        match self.post(&request).await {
            Ok(response) => response,
            Err(err) => RelayResponse::failed(RELAY_UNAVAILABLE, Some(format!("{err:#}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_url_is_answered_without_network() {
        let relay = FetchRelay::new(reqwest::Client::new());
        let response = relay.fetch_image("  ").await;
        assert_eq!(response, RelayResponse::failed(MISSING_URL, None));
    }

    #[tokio::test]
    async fn stopped_relay_task_yields_failure_response() {
        let (handle, task) = spawn(FetchRelay::new(reqwest::Client::new()));
        task.abort();
        let _ = task.await;

        let response = handle.fetch_image_as_base64("https://img.faloo.com/1.gif").await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(RELAY_UNAVAILABLE));
    }
}
