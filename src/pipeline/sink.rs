use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::orchestrator::SessionContext;
use crate::core::errors::{PipelineError, ProviderError};
use crate::history::{MemoryStore, TranscriptLine};

/// Appends a completed exchange to session memory.
pub struct PersistenceSink {
    store: Arc<dyn MemoryStore>,
    timeout: Duration,
}

impl PersistenceSink {
    pub fn new(store: Arc<dyn MemoryStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// One append of the user turn and the assistant turn. No retries.
    pub async fn persist(
        &self,
        session: &SessionContext,
        latest: &str,
        answer: &str,
    ) -> Result<(), PipelineError> {
        let lines = [TranscriptLine::user(latest), TranscriptLine::assistant(answer)];

        timeout(
            self.timeout,
            self.store.append(&session.session_id, &session.user_id, &lines),
        )
        .await
        .map_err(|_| PipelineError::persistence(ProviderError::Timeout(self.timeout)))?
        .map_err(PipelineError::persistence)?;

        tracing::debug!(
            "Persisted exchange to {} session {}",
            self.store.name(),
            session.session_id
        );
        Ok(())
    }
}
