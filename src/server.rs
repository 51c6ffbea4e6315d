//! HTTP surface: `POST /` renders the request body.
//!
//! Query parameters select the output: `type` (`png`, `jpeg`/`jpg`, `webp`;
//! default `png`) and `encoding` (`binary` or `base64`; default `binary`).
//! Rejected markup is answered with `400` and the reason as plain text, render
//! failures with `500` and a diagnostic.

use crate::orchestrator::{RenderOrchestrator, RenderOutput, RenderRequest};
use crate::renderer::Renderer;
use crate::validator::{Rejection, Validator};
use crate::Error;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use log::{debug, error, info};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Shared state of the HTTP handlers.
pub struct AppState<R: Renderer> {
    pub orchestrator: Arc<RenderOrchestrator<R>>,
    /// `None` when validation is turned off
    pub validator: Option<Arc<Validator>>,
}

impl<R: Renderer> AppState<R> {
    pub fn new(orchestrator: RenderOrchestrator<R>, validator: Option<Validator>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            validator: validator.map(Arc::new),
        }
    }
}

impl<R: Renderer> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            validator: self.validator.clone(),
        }
    }
}

/// Errors returned by the render endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Render(#[from] Error),

    #[error("unsupported content type '{0}', expected text/*")]
    UnsupportedMediaType(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Rejected(reason) => (StatusCode::BAD_REQUEST, reason.to_string()).into_response(),
            unsupported @ ApiError::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, unsupported.to_string()).into_response()
            }
            ApiError::Render(err) => {
                error!("render request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.diagnostic()).into_response()
            }
        }
    }
}

/// Build the router serving `POST /`.
pub fn router<R: Renderer>(state: AppState<R>, body_limit: usize) -> Router {
    Router::new()
        .route("/", post(render_markup::<R>))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Accept a missing content type or any `text/*` one.
fn check_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };
    let raw = value.to_str().unwrap_or_default();
    let essence = raw.split(';').next().unwrap_or_default().trim();
    let is_text = essence
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("text/"));
    if is_text {
        Ok(())
    } else {
        Err(ApiError::UnsupportedMediaType(raw.to_string()))
    }
}

fn digest(markup: &str) -> String {
    let hash = Sha256::digest(markup.as_bytes());
    hex::encode(&hash[..8])
}

async fn render_markup<R: Renderer>(
    State(state): State<AppState<R>>,
    Query(request): Query<RenderRequest>,
    headers: HeaderMap,
    markup: String,
) -> Result<Response, ApiError> {
    check_content_type(&headers)?;
    let fingerprint = digest(&markup);
    debug!(
        "render request: {} bytes (sha256 {}), {} as {:?}",
        markup.len(),
        fingerprint,
        request.format,
        request.encoding
    );

    let markup = match &state.validator {
        Some(validator) => {
            let validator = Arc::clone(validator);
            let (markup, verdict) = tokio::task::spawn_blocking(move || {
                let verdict = validator.validate(&markup);
                (markup, verdict)
            })
            .await
            .map_err(Error::from)?;
            if let Some(reason) = verdict {
                info!("rejected markup {}: {}", fingerprint, reason);
                return Err(ApiError::Rejected(reason));
            }
            markup
        }
        None => markup,
    };

    let output = state.orchestrator.render(&markup, &request).await?;
    let response = match output {
        RenderOutput::Binary(bytes) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static(request.format.mime()))],
            bytes,
        )
            .into_response(),
        base64 @ RenderOutput::Base64(_) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
            base64.data_uri(request.format),
        )
            .into_response(),
    };
    Ok(response)
}
