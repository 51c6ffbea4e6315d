//! Turning one accepted document into an image.

use crate::pool::SessionPool;
use crate::renderer::{CaptureOptions, RenderSession, Renderer};
use crate::{Encoding, Error, ImageFormat, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{error, info, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Id of the element that wraps submitted markup.
pub const CONTAINER_ID: &str = "__html2img_container__";

/// Wrap `markup` in the document loaded into a session.
///
/// The container is an inline block so its bounding box is the intrinsic size
/// of the content, not the width of the viewport.
pub fn wrap_markup(markup: &str) -> String {
    format!(
        "<html><body><div id=\"{}\" style=\"display:inline-block\">{}</div></body></html>",
        CONTAINER_ID, markup
    )
}

/// Per-service render settings.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Deadline covering session acquisition, load, layout and capture
    pub render_timeout: Duration,
    /// Quality used for lossy formats
    pub jpeg_quality: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(30),
            jpeg_quality: 80,
        }
    }
}

/// What the caller asked for. Deserialized from the query string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RenderRequest {
    #[serde(default, rename = "type")]
    pub format: ImageFormat,
    #[serde(default)]
    pub encoding: Encoding,
}

/// A finished image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    Binary(Vec<u8>),
    /// Standard base64 of the image bytes, without any prefix
    Base64(String),
}

impl RenderOutput {
    /// `data:image/<type>;base64,<data>` form of the image.
    pub fn data_uri(&self, format: ImageFormat) -> String {
        let data = match self {
            RenderOutput::Binary(bytes) => STANDARD.encode(bytes),
            RenderOutput::Base64(data) => data.clone(),
        };
        format!("data:image/{};base64,{}", format.as_str(), data)
    }

    pub fn len(&self) -> usize {
        match self {
            RenderOutput::Binary(bytes) => bytes.len(),
            RenderOutput::Base64(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives one render through a pooled session.
pub struct RenderOrchestrator<R: Renderer> {
    pool: SessionPool<R>,
    options: RenderOptions,
}

impl<R: Renderer> RenderOrchestrator<R> {
    pub fn new(pool: SessionPool<R>, options: RenderOptions) -> Self {
        Self { pool, options }
    }

    pub fn pool(&self) -> &SessionPool<R> {
        &self.pool
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Render `markup`, which must already have been accepted.
    ///
    /// Failures leave the session in the pool for reuse. A render that
    /// overruns the deadline has its session discarded and reports
    /// [`Error::Timeout`].
    pub async fn render(&self, markup: &str, request: &RenderRequest) -> Result<RenderOutput> {
        let started = Instant::now();
        let deadline = started + self.options.render_timeout;
        let timeout_ms = self.options.render_timeout.as_millis() as u64;

        let lease = match tokio::time::timeout_at(deadline, self.pool.acquire()).await {
            Ok(lease) => lease?,
            Err(_) => {
                warn!("no session available within {}ms", timeout_ms);
                return Err(Error::Timeout(timeout_ms));
            }
        };
        let id = lease.id();

        let captured = tokio::time::timeout_at(deadline, self.capture(lease.session(), markup, request.format)).await;
        let elapsed = started.elapsed().as_millis();
        match captured {
            Ok(Ok(bytes)) => {
                lease.release();
                info!(
                    "rendered {} ({:?}, {} bytes) on session {} in {}ms",
                    request.format,
                    request.encoding,
                    bytes.len(),
                    id,
                    elapsed
                );
                Ok(match request.encoding {
                    Encoding::Binary => RenderOutput::Binary(bytes),
                    Encoding::Base64 => RenderOutput::Base64(STANDARD.encode(&bytes)),
                })
            }
            Ok(Err(e)) => {
                lease.release();
                error!("render failed on session {} after {}ms: {}", id, elapsed, e);
                Err(e)
            }
            Err(_) => {
                lease.discard().await;
                error!("render timed out on session {} after {}ms, session discarded", id, elapsed);
                Err(Error::Timeout(timeout_ms))
            }
        }
    }

    async fn capture(&self, session: &R::Session, markup: &str, format: ImageFormat) -> Result<Vec<u8>> {
        session.set_content(&wrap_markup(markup)).await?;
        let clip = session.evaluate_layout(&format!("#{}", CONTAINER_ID)).await?;
        if clip.is_empty() {
            return Err(Error::LayoutError(format!(
                "rendered content has no visible area ({}x{})",
                clip.width, clip.height
            )));
        }
        let options = CaptureOptions::for_format(format, self.options.jpeg_quality);
        session.capture(clip, format, options).await
    }
}
