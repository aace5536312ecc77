use std::num::NonZeroU32;
use std::sync::{Arc, Weak};
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::config::settings::MemoryBackend;
use crate::core::config::{AppSettings, ConfigService};
use crate::core::errors::ApiError;
use crate::history::{MemoryStore, SqliteMemoryStore, ZepMemoryStore};
use crate::llm::{CompletionProvider, EmbeddingProvider, OpenAiProvider};
use crate::pipeline::ChatPipeline;
use crate::rag::{ChromaStore, VectorStore};

pub mod error;

use error::InitializationError;

type UserRateLimiter = DefaultKeyedRateLimiter<String>;

const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// The four external capabilities the service is built from.
#[derive(Clone)]
pub struct Providers {
    pub completion: Arc<dyn CompletionProvider>,
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStore>,
    pub memory: Arc<dyn MemoryStore>,
}

/// Shared application state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppSettings>,
    pub pipeline: Arc<ChatPipeline>,
    pub memory: Arc<dyn MemoryStore>,
    pub vector_store: Arc<dyn VectorStore>,
    rate_limiter: Option<Arc<UserRateLimiter>>,
}

impl AppState {
    /// Loads settings and connects the configured providers.
    pub async fn initialize(config: &ConfigService) -> Result<Arc<Self>, InitializationError> {
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let completion = OpenAiProvider::new(
            &settings.completion.base_url,
            settings.completion.api_key.clone(),
            settings.completion.model.clone(),
        );
        let embedding = OpenAiProvider::new(
            &settings.embedding.base_url,
            settings.embedding.api_key.clone(),
            settings.embedding.model.clone(),
        )
        .with_dimensions(settings.embedding.dimensions);

        let vector_store = ChromaStore::new(
            &settings.vector_store.url,
            settings.vector_store.auth_token.clone(),
            settings.vector_store.collection.clone(),
        );

        let memory: Arc<dyn MemoryStore> = match settings.memory.backend {
            MemoryBackend::Zep => Arc::new(ZepMemoryStore::new(
                &settings.memory.url,
                settings.memory.api_key.clone(),
            )),
            MemoryBackend::Sqlite => Arc::new(
                SqliteMemoryStore::open(&config.paths().db_path)
                    .await
                    .map_err(|e| InitializationError::Memory(e.into()))?,
            ),
        };
        tracing::info!(
            "Using {} memory store, {} vector store",
            memory.name(),
            vector_store.name()
        );

        Ok(Self::from_parts(
            settings,
            Providers {
                completion: Arc::new(completion),
                embedding: Arc::new(embedding),
                vector_store: Arc::new(vector_store),
                memory,
            },
        ))
    }

    /// Builds the state around already-constructed providers.
    pub fn from_parts(settings: AppSettings, providers: Providers) -> Arc<Self> {
        let pipeline = Arc::new(ChatPipeline::from_settings(
            &settings,
            providers.completion,
            providers.embedding,
            providers.vector_store.clone(),
            providers.memory.clone(),
        ));

        let rate_limiter = NonZeroU32::new(settings.server.rate_limit_per_minute)
            .map(|per_minute| Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))));
        if let Some(limiter) = &rate_limiter {
            spawn_rate_limit_pruner(limiter, RATE_LIMIT_PRUNE_INTERVAL);
        }

        Arc::new(AppState {
            settings: Arc::new(settings),
            pipeline,
            memory: providers.memory,
            vector_store: providers.vector_store,
            rate_limiter,
        })
    }

    /// Consumes one request from the user's quota.
    pub fn check_rate_limit(&self, user_id: &str) -> Result<(), ApiError> {
        match &self.rate_limiter {
            Some(limiter) => limiter
                .check_key(&user_id.to_string())
                .map_err(|_| ApiError::TooManyRequests),
            None => Ok(()),
        }
    }
}

/// Periodically drops per-user entries whose quota has fully replenished.
/// The task holds a weak reference and stops once the limiter is gone.
/// Returns `None` outside a tokio runtime.
fn spawn_rate_limit_pruner(limiter: &Arc<UserRateLimiter>, period: Duration) -> Option<JoinHandle<()>> {
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let limiter: Weak<UserRateLimiter> = Arc::downgrade(limiter);

    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(limiter) = limiter.upgrade() else {
                tracing::debug!("Rate limiter dropped, pruner exiting");
                break;
            };
            limiter.retain_recent();
            limiter.shrink_to_fit();
            tracing::trace!("Rate limiter holds {} users", limiter.len());
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_second: u32) -> Arc<UserRateLimiter> {
        let quota = Quota::per_second(NonZeroU32::new(per_second).expect("non-zero"));
        Arc::new(RateLimiter::keyed(quota))
    }

    #[tokio::test]
    async fn pruner_forgets_users_whose_quota_refilled() {
        let limiter = limiter(1000);
        let pruner = spawn_rate_limit_pruner(&limiter, Duration::from_millis(10)).expect("runtime");

        limiter.check_key(&"alice".to_string()).expect("within quota");
        assert_eq!(limiter.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(limiter.is_empty());

        drop(limiter);
        tokio::time::timeout(Duration::from_secs(1), pruner)
            .await
            .expect("pruner stops")
            .expect("pruner task");
    }

    #[test]
    fn pruner_needs_a_runtime() {
        assert!(spawn_rate_limit_pruner(&limiter(5), Duration::from_secs(1)).is_none());
    }
}
