//! In-process renderer with deterministic output.
//!
//! Produces placeholder images and records what it was asked to do, so the
//! pool, orchestrator and HTTP layer can be exercised without a browser.
//! Failures and slow loads can be injected at runtime.

use super::{CaptureOptions, ClipRect, RenderSession, Renderer};
use crate::{Error, ImageFormat, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A 1x1 transparent PNG.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// JPEG start/end markers only.
pub const PLACEHOLDER_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

/// RIFF/WEBP header only.
pub const PLACEHOLDER_WEBP: &[u8] = b"RIFF\x04\x00\x00\x00WEBP";

#[derive(Default)]
struct NoopState {
    sessions_created: AtomicUsize,
    sessions_closed: AtomicUsize,
    closed: AtomicBool,
    fail_sessions: AtomicBool,
    fail_capture: AtomicBool,
    content_delay: Mutex<Duration>,
    session_delay: Mutex<Duration>,
    documents: Mutex<Vec<String>>,
    captures: Mutex<Vec<(ClipRect, ImageFormat, CaptureOptions)>>,
}

/// Renderer stand-in. Cloning shares the instrumentation.
#[derive(Clone, Default)]
pub struct NoopRenderer {
    state: Arc<NoopState>,
}

impl NoopRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `set_content` call by `delay`.
    pub fn set_content_delay(&self, delay: Duration) {
        *self.state.content_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Delay every `new_session` call by `delay`.
    pub fn set_session_delay(&self, delay: Duration) {
        *self.state.session_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Make `new_session` fail.
    pub fn set_fail_sessions(&self, fail: bool) {
        self.state.fail_sessions.store(fail, Ordering::SeqCst);
    }

    /// Make `capture` fail.
    pub fn set_fail_capture(&self, fail: bool) {
        self.state.fail_capture.store(fail, Ordering::SeqCst);
    }

    pub fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    /// Whether `Renderer::close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Every document passed to `set_content`, oldest first.
    pub fn documents(&self) -> Vec<String> {
        self.state.documents.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every capture request, oldest first.
    pub fn captures(&self) -> Vec<(ClipRect, ImageFormat, CaptureOptions)> {
        self.state.captures.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Renderer for NoopRenderer {
    type Session = NoopSession;

    async fn new_session(&self) -> Result<NoopSession> {
        if self.is_closed() {
            return Err(Error::SessionError("renderer is closed".into()));
        }
        if self.state.fail_sessions.load(Ordering::SeqCst) {
            return Err(Error::SessionError("session creation refused".into()));
        }
        let delay = *self.state.session_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let id = self.state.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(NoopSession {
            id,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        })
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Session opened by [`NoopRenderer`].
pub struct NoopSession {
    id: usize,
    state: Arc<NoopState>,
    closed: AtomicBool,
}

impl NoopSession {
    /// Creation order of this session, starting at 1.
    pub fn id(&self) -> usize {
        self.id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionError(format!("session {} is closed", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl RenderSession for NoopSession {
    async fn set_content(&self, html: &str) -> Result<()> {
        self.ensure_open()?;
        let delay = *self.state.content_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(html.to_string());
        Ok(())
    }

    async fn evaluate_layout(&self, selector: &str) -> Result<ClipRect> {
        self.ensure_open()?;
        let id = selector.trim_start_matches('#');
        let documents = self.state.documents.lock().unwrap_or_else(PoisonError::into_inner);
        match documents.last() {
            Some(doc) if doc.contains(id) => Ok(ClipRect {
                x: 8.0,
                y: 8.0,
                width: 120.0,
                height: 18.0,
            }),
            _ => Err(Error::LayoutError(format!("no element matches {}", selector))),
        }
    }

    async fn capture(&self, clip: ClipRect, format: ImageFormat, options: CaptureOptions) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if self.state.fail_capture.load(Ordering::SeqCst) {
            return Err(Error::RenderError("capture failed".into()));
        }
        self.state
            .captures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((clip, format, options));
        let bytes = match format {
            ImageFormat::Png => PLACEHOLDER_PNG,
            ImageFormat::Jpeg => PLACEHOLDER_JPEG,
            ImageFormat::Webp => PLACEHOLDER_WEBP,
        };
        Ok(bytes.to_vec())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_documents_and_captures() {
        let renderer = NoopRenderer::new();
        let session = renderer.new_session().await.unwrap();
        session.set_content("<div id=\"box\">x</div>").await.unwrap();
        let clip = session.evaluate_layout("#box").await.unwrap();
        let png = session
            .capture(clip, ImageFormat::Png, CaptureOptions::default())
            .await
            .unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(renderer.documents().len(), 1);
        assert_eq!(renderer.captures()[0].1, ImageFormat::Png);
    }

    #[tokio::test]
    async fn closed_sessions_refuse_work() {
        let renderer = NoopRenderer::new();
        let session = renderer.new_session().await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(renderer.sessions_closed(), 1);
        assert!(matches!(session.set_content("x").await, Err(Error::SessionError(_))));
    }

    #[tokio::test]
    async fn injected_failures() {
        let renderer = NoopRenderer::new();
        renderer.set_fail_sessions(true);
        assert!(renderer.new_session().await.is_err());
        renderer.set_fail_sessions(false);
        let session = renderer.new_session().await.unwrap();
        assert_eq!(session.id(), 1);
        renderer.set_fail_capture(true);
        let clip = ClipRect { x: 0.0, y: 0.0, width: 1.0, height: 1.0 };
        let res = session.capture(clip, ImageFormat::Jpeg, CaptureOptions::default()).await;
        assert!(matches!(res, Err(Error::RenderError(_))));
    }
}
