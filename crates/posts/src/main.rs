use std::sync::Arc;

use anyhow::Context;

use eventide_infra::{EngineConfig, EventLog, InMemoryEventStore, InMemoryViewStore, PgClient};
use eventide_posts::PostService;
use eventide_pubsub::{InMemoryPubSub, PubSub};

fn main() -> anyhow::Result<()> {
    eventide_observability::init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let bus = Bus::from_config(&config)?;
    let service = build_service(&config, Arc::clone(&bus.pubsub))?;

    let author = "demo@example.com";
    let first = service.post(author, "Hello", "First post")?;
    let second = service.post(author, "Draft", "To be removed")?;
    service.update_post(&first.id, author, "Hello, world", "First post, edited")?;
    service.delete_post(&second.id, author, Some("draft"))?;

    for summary in service.post_summaries(author)? {
        tracing::info!(post_id = %summary.id, title = %summary.title, "post summary");
    }

    service.shutdown();
    bus.shutdown();
    Ok(())
}

fn build_service(config: &EngineConfig, pubsub: Arc<dyn PubSub>) -> anyhow::Result<PostService> {
    let service = match &config.database_url {
        Some(url) => {
            let client = PgClient::connect(url).context("failed to connect to postgres")?;
            PostService::postgres(client, pubsub, config)?
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            PostService::new(
                Arc::new(EventLog::new(InMemoryEventStore::new())),
                InMemoryViewStore::new(),
                pubsub,
                config,
            )?
        }
    };
    Ok(service)
}

/// The notification bus, plus the concrete Redis transport when one is in use
/// so its consumer threads can be stopped.
struct Bus {
    pubsub: Arc<dyn PubSub>,
    #[cfg(feature = "redis")]
    redis: Option<Arc<eventide_infra::pubsub::RedisStreamsPubSub>>,
}

impl Bus {
    #[cfg(feature = "redis")]
    fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        use eventide_infra::pubsub::RedisStreamsPubSub;

        if config.redis_url.is_some() {
            let redis =
                Arc::new(RedisStreamsPubSub::from_config(config).context("failed to open redis")?);
            return Ok(Self {
                pubsub: redis.clone(),
                redis: Some(redis),
            });
        }
        Ok(Self {
            pubsub: Arc::new(InMemoryPubSub::new()),
            redis: None,
        })
    }

    #[cfg(not(feature = "redis"))]
    fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        if config.redis_url.is_some() {
            tracing::warn!("REDIS_URL set but the redis feature is disabled; using the in-process bus");
        }
        Ok(Self {
            pubsub: Arc::new(InMemoryPubSub::new()),
        })
    }

    fn shutdown(&self) {
        #[cfg(feature = "redis")]
        if let Some(redis) = &self.redis {
            redis.shutdown();
        }
    }
}
