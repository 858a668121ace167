//! Usage extraction from upstream response bodies.
//!
//! Two shapes of upstream response are supported:
//!
//! - **Buffered** JSON bodies, scanned once with [`extract_buffered`]
//! - **Streaming** SSE bodies, wrapped in a [`CaptureStream`] that forwards
//!   every chunk unchanged to the client while scanning `data:` frames for
//!   the request id and the final usage object

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tokio::sync::oneshot;

use tollgate_core::{BillableUsage, TokenCounts};

// =============================================================================
// Buffered Extraction
// =============================================================================

/// Extract billable usage from a buffered JSON response body.
///
/// The body must be a JSON object carrying an `id` string. A nested `usage`
/// object contributes token counts; when it is absent the counts are zero
/// (spend-log deployments bill from the id alone). Returns `None` when the
/// body is not JSON, not an object, or has no id.
#[must_use]
pub fn extract_buffered(body: &[u8]) -> Option<BillableUsage> {
    let doc: Value = serde_json::from_slice(body).ok()?;
    let obj = doc.as_object()?;
    let request_id = obj.get("id")?.as_str()?;
    if request_id.trim().is_empty() {
        return None;
    }

    let counts = match obj.get("usage") {
        Some(usage) => serde_json::from_value::<TokenCounts>(usage.clone()).ok()?,
        None => TokenCounts::default(),
    };
    Some(BillableUsage::new(request_id, counts))
}

// =============================================================================
// Streaming Capture
// =============================================================================

/// Usage state accumulated while a stream is forwarded.
///
/// The request id comes from the first frame that carries one; the token
/// counts come from the last frame that carries a `usage` object (providers
/// send it on the final chunk).
#[derive(Debug, Clone, Default)]
pub struct UsageCapture {
    /// First upstream request id seen, if any.
    pub request_id: Option<String>,

    /// Latest usage object seen, if any.
    pub usage: Option<TokenCounts>,
}

impl UsageCapture {
    /// Convert the capture into billable usage.
    ///
    /// Requires a request id; missing token counts degrade to zero.
    #[must_use]
    pub fn into_billable(self) -> Option<BillableUsage> {
        let request_id = self.request_id?;
        Some(BillableUsage::new(
            request_id,
            self.usage.unwrap_or_default(),
        ))
    }

    fn scan_chunk(&mut self, chunk: &[u8]) {
        for line in chunk.split(|b| *b == b'\n') {
            let line = trim_ascii(line);
            let Some(payload) = line.strip_prefix(b"data:") else {
                continue;
            };
            let payload = trim_ascii(payload);
            if payload.is_empty() || payload == b"[DONE]" {
                continue;
            }
            // Non-JSON frames are forwarded but never billed from.
            let Ok(frame) = serde_json::from_slice::<Value>(payload) else {
                continue;
            };

            if self.request_id.is_none() {
                if let Some(id) = frame.get("id").and_then(Value::as_str) {
                    if !id.trim().is_empty() {
                        self.request_id = Some(id.to_string());
                    }
                }
            }
            if let Some(usage) = frame.get("usage") {
                if let Ok(counts) = serde_json::from_value::<TokenCounts>(usage.clone()) {
                    self.usage = Some(counts);
                }
            }
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// A pass-through stream wrapper that captures billing state.
///
/// Every chunk from the inner stream is yielded to the consumer byte for
/// byte. When the inner stream ends, or when the wrapper is dropped before
/// it ends (client disconnect), whatever was captured so far is delivered
/// exactly once over the paired receiver.
pub struct CaptureStream<S> {
    inner: Option<S>,
    capture: UsageCapture,
    tx: Option<oneshot::Sender<UsageCapture>>,
}

impl<S> CaptureStream<S> {
    /// Wrap `inner`, returning the wrapper and the capture receiver.
    #[must_use]
    pub fn new(inner: S) -> (Self, oneshot::Receiver<UsageCapture>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: Some(inner),
                capture: UsageCapture::default(),
                tx: Some(tx),
            },
            rx,
        )
    }

    fn finish(&mut self) {
        self.inner = None;
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(self.capture.clone());
        }
    }
}

impl<S, E> Stream for CaptureStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
{
    type Item = std::result::Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match Pin::new(inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.capture.scan_chunk(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for CaptureStream<S> {
    fn drop(&mut self) {
        self.finish();
    }
}
