//! Bridge from the async providers to the synchronous worker.
//!
//! The iteration driver and the sandbox tools run on a blocking worker
//! thread; [`BlockingLm`] lets them call an async [`LmProvider`] by parking
//! on the runtime handle. Batched prompts fan out concurrently and come
//! back in order, with per-item failures rendered as `Error: …` strings
//! per the `LmHandler` contract.

use std::sync::Arc;

use braid_domain::error::Result;
use braid_domain::{ChatMessage, LmHandler};
use futures_util::future::join_all;
use tokio::runtime::Handle;

use crate::traits::LmProvider;

pub struct BlockingLm {
    provider: Arc<dyn LmProvider>,
    handle: Handle,
}

impl BlockingLm {
    /// `handle` must belong to a runtime that outlives this adapter; calls
    /// must come from a non-async thread (the blocking worker pool).
    pub fn new(provider: Arc<dyn LmProvider>, handle: Handle) -> Self {
        Self { provider, handle }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn backend(&self) -> &'static str {
        self.provider.backend()
    }
}

impl LmHandler for BlockingLm {
    fn completion(&self, messages: &[ChatMessage]) -> Result<String> {
        self.handle.block_on(self.provider.complete(messages))
    }

    fn completion_batched(&self, prompts: &[String]) -> Vec<String> {
        let futures: Vec<_> = prompts
            .iter()
            .map(|p| {
                let messages = vec![ChatMessage::user(p.clone())];
                let provider = self.provider.clone();
                async move { provider.complete(&messages).await }
            })
            .collect();

        self.handle
            .block_on(join_all(futures))
            .into_iter()
            .map(|r| match r {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "batched completion item failed");
                    format!("Error: {e}")
                }
            })
            .collect()
    }
}
