//! Process-wide shared state
//!
//! Initialized once at startup and injected into every component: the
//! pool, the event bus, the realtime hub, and the enricher queue are the
//! singletons of the system. Repositories are cheap views over the pool
//! and are constructed on demand.

use std::sync::Arc;

use sqlx::PgPool;

use crate::ai::enricher::EnricherQueue;
use crate::config::AppConfig;
use crate::database::{
    AuditRepository, CommentRepository, ExtensionRepository, FormTemplateRepository,
    GapRepository, HistoryRepository, PocRepository, SimilarityRepository, SopRepository,
    UserRepository,
};
use crate::events::EventBus;
use crate::gaps::GapService;
use crate::realtime::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: PgPool,
    pub bus: EventBus,
    pub hub: RealtimeHub,
    pub enricher: EnricherQueue,
    pub audit: AuditRepository,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        pool: PgPool,
        bus: EventBus,
        hub: RealtimeHub,
        enricher: EnricherQueue,
    ) -> Self {
        let audit = AuditRepository::new(pool.clone());
        Self {
            config,
            pool,
            bus,
            hub,
            enricher,
            audit,
        }
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    pub fn gaps(&self) -> GapRepository {
        GapRepository::new(self.pool.clone())
    }

    pub fn pocs(&self) -> PocRepository {
        PocRepository::new(self.pool.clone())
    }

    pub fn comments(&self) -> CommentRepository {
        CommentRepository::new(self.pool.clone())
    }

    pub fn history(&self) -> HistoryRepository {
        HistoryRepository::new(self.pool.clone())
    }

    pub fn extensions(&self) -> ExtensionRepository {
        ExtensionRepository::new(self.pool.clone())
    }

    pub fn similarity(&self) -> SimilarityRepository {
        SimilarityRepository::new(self.pool.clone())
    }

    pub fn sops(&self) -> SopRepository {
        SopRepository::new(self.pool.clone())
    }

    pub fn form_templates(&self) -> FormTemplateRepository {
        FormTemplateRepository::new(self.pool.clone())
    }

    pub fn gap_service(&self) -> GapService {
        GapService::new(self.clone())
    }
}
