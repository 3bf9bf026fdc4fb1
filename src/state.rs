use crate::{
    config::RuntimeConfiguration,
    data::{Store, memory::MemoryStore, postgres::PostgresStore},
    error::RegistrarResult,
};
use std::{ops::Deref, sync::Arc, time::Instant};

#[derive(Clone, Debug)]
pub struct RegistrarState {
    store: Arc<dyn Store>,
    postgres: Option<PostgresStore>,
    config: RuntimeConfiguration,
    started_at: Instant,
}

impl RegistrarState {
    pub async fn new(config: RuntimeConfiguration) -> RegistrarResult<Self> {
        let db_config = config.db_config();

        if db_config.is_in_memory() {
            warn!("Using the in-memory store, nothing will be persisted");
            return Ok(Self::with_store(Arc::new(MemoryStore::default()), config));
        }

        let postgres = PostgresStore::connect(&db_config).await?;
        info!("Connected to database");

        Ok(Self {
            store: Arc::new(postgres.clone()),
            postgres: Some(postgres),
            config,
            started_at: Instant::now(),
        })
    }

    pub fn with_store(store: Arc<dyn Store>, config: RuntimeConfiguration) -> Self {
        Self {
            store,
            postgres: None,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &RuntimeConfiguration {
        &self.config
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub async fn sensible_shutdown(&self) {
        if let Some(postgres) = &self.postgres {
            postgres.close().await;
            info!("Closed database pool");
        }
    }
}

impl Deref for RegistrarState {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}
