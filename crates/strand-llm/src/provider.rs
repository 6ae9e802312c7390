//! The provider trait consumed by the session loop.
//!
//! A provider runs one multi-step tool-calling generation per
//! [`Provider::stream`] call and reports it as a stream of
//! [`StreamEvent`]s. Tool execution happens on the provider side; the
//! session loop only observes invocations and results.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use strand_core::events::StreamEvent;
use strand_core::usage::TokenUsage;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderResult;
use crate::request::StreamRequest;

/// Boxed stream of provider content units.
pub type StreamEventStream = Pin<Box<dyn Stream<Item = ProviderResult<StreamEvent>> + Send>>;

/// Late-resolving metadata for a stream.
///
/// Either call may block until the provider has settled its accounting, so
/// callers guard them with timeouts.
#[async_trait]
pub trait StreamMetadata: Send + Sync {
    /// Provider's own usage total for the call.
    ///
    /// For some providers this reflects only the most recent step.
    async fn total_usage(&self) -> ProviderResult<Option<TokenUsage>>;

    /// Provider-side per-step metadata, oldest first.
    async fn steps(&self) -> ProviderResult<Vec<Value>>;
}

/// Metadata source that knows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMetadata;

#[async_trait]
impl StreamMetadata for NoMetadata {
    async fn total_usage(&self) -> ProviderResult<Option<TokenUsage>> {
        Ok(None)
    }

    async fn steps(&self) -> ProviderResult<Vec<Value>> {
        Ok(Vec::new())
    }
}

/// An open provider call.
pub struct ProviderStream {
    /// Content units in order.
    pub events: StreamEventStream,
    /// Totals resolved once the stream settles.
    pub metadata: Arc<dyn StreamMetadata>,
}

impl ProviderStream {
    /// Wrap a bare event stream with no metadata source.
    pub fn new(events: StreamEventStream) -> Self {
        Self {
            events,
            metadata: Arc::new(NoMetadata),
        }
    }

    /// Attach a metadata source.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Arc<dyn StreamMetadata>) -> Self {
        self.metadata = metadata;
        self
    }
}

impl std::fmt::Debug for ProviderStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderStream").finish_non_exhaustive()
    }
}

/// A cancellable model provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider family name (`anthropic`, `openai`, ...).
    fn name(&self) -> &str;

    /// Open a streaming multi-step call.
    ///
    /// Synchronous rejections (missing credentials, unknown model) return
    /// `Err` here; failures after the stream opens arrive as stream items.
    /// Implementations must stop producing items once `cancel` fires.
    async fn stream(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<ProviderStream>;
}
