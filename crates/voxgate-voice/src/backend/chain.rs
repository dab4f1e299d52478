//! Ordered list of interchangeable backends with availability fallback.

use std::sync::Arc;

use super::{Backend, BackendStatus};
use crate::error::BackendError;

/// Backends in fixed priority order (first = most preferred).
pub struct BackendChain<T: ?Sized> {
    backends: Vec<Arc<T>>,
}

impl<T: ?Sized> Default for BackendChain<T> {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
        }
    }
}

impl<T: ?Sized> Clone for BackendChain<T> {
    fn clone(&self) -> Self {
        Self {
            backends: self.backends.clone(),
        }
    }
}

impl<T: Backend + ?Sized> BackendChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a backend at the lowest priority.
    #[must_use]
    pub fn with(mut self, backend: Arc<T>) -> Self {
        self.push(backend);
        self
    }

    pub fn push(&mut self, backend: Arc<T>) {
        self.backends.push(backend);
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// The preferred backend if named and available, otherwise the first
    /// available one in priority order.
    pub async fn get_with_fallback(&self, preferred: Option<&str>) -> Result<Arc<T>, BackendError> {
        self.select(preferred, None).await
    }

    /// Like [`get_with_fallback`](Self::get_with_fallback), also skipping
    /// backends whose input limit is below `text_len` characters.
    pub async fn select_for(
        &self,
        preferred: Option<&str>,
        text_len: usize,
    ) -> Result<Arc<T>, BackendError> {
        self.select(preferred, Some(text_len)).await
    }

    async fn select(&self, preferred: Option<&str>, text_len: Option<usize>) -> Result<Arc<T>, BackendError> {
        let fits = |backend: &T| text_len.is_none_or(|len| backend.capabilities().accepts_len(len));

        let preferred_idx = preferred.and_then(|name| {
            let idx = self.backends.iter().position(|b| b.name() == name);
            if idx.is_none() {
                tracing::warn!(backend = name, "Preferred backend is not registered");
            }
            idx
        });

        if let Some(idx) = preferred_idx {
            let backend = &self.backends[idx];
            if fits(backend) && backend.is_available().await {
                return Ok(Arc::clone(backend));
            }
            tracing::debug!(backend = backend.name(), "Preferred backend unavailable, falling back");
        }

        for (idx, backend) in self.backends.iter().enumerate() {
            if Some(idx) == preferred_idx {
                continue;
            }
            if !fits(backend) {
                tracing::debug!(backend = backend.name(), "Input too long for backend, skipping");
                continue;
            }
            if backend.is_available().await {
                return Ok(Arc::clone(backend));
            }
            tracing::debug!(backend = backend.name(), "Backend unavailable");
        }

        Err(BackendError::NoBackendAvailable)
    }

    /// Availability of every backend, in priority order.
    pub async fn availability(&self) -> Vec<BackendStatus> {
        let mut statuses = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            statuses.push(BackendStatus {
                name: backend.name().to_string(),
                available: backend.is_available().await,
                capabilities: backend.capabilities(),
            });
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SpeechSynthesizer;
    use crate::backend::scripted::ScriptedSynthesizer;

    #[test]
    fn empty_chain_has_nothing_to_offer() {
        let chain: BackendChain<dyn SpeechSynthesizer> = BackendChain::new();
        assert!(chain.is_empty());
        let result = tokio_test::block_on(chain.get_with_fallback(None));
        assert!(matches!(result, Err(BackendError::NoBackendAvailable)));
    }

    #[test]
    fn names_keep_priority_order() {
        let chain = BackendChain::<dyn SpeechSynthesizer>::new()
            .with(Arc::new(ScriptedSynthesizer::new("first")))
            .with(Arc::new(ScriptedSynthesizer::unavailable("second")));
        assert_eq!(chain.names(), vec!["first", "second"]);

        let statuses = tokio_test::block_on(chain.availability());
        assert!(statuses[0].available);
        assert!(!statuses[1].available);
    }
}
