use std::sync::Arc;

use room_core::model::{LearnerId, StageCatalog};
use room_core::{Clock, DEFAULT_MINUTES};
use sandbox::{Sandbox, SandboxLimits, Verifier};
use storage::http::{HttpProgressConfig, HttpProgressRepository};
use storage::repository::Storage;
use tracing::info;

use crate::error::AppServicesError;
use crate::identity_service::IdentityService;
use crate::progress_sync::ProgressSync;
use crate::room::{RoomSession, SharedSession};
use crate::timer_driver::TimerDriver;

/// Knobs for assembling one play session.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub minutes: u32,
    /// Play without a learner identity; progress sync is unavailable.
    pub guest: bool,
    pub limits: SandboxLimits,
    pub clock: Clock,
    /// Sync progress with a remote service instead of the local database.
    pub remote_progress: Option<HttpProgressConfig>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            minutes: DEFAULT_MINUTES,
            guest: false,
            limits: SandboxLimits::default(),
            clock: Clock::default(),
            remote_progress: None,
        }
    }
}

/// Assembles the session, its timer driver and its sync controller.
#[derive(Clone)]
pub struct AppServices {
    identity: Option<LearnerId>,
    catalog: Arc<StageCatalog>,
    session: SharedSession,
    timer: Arc<TimerDriver>,
    sync: Arc<ProgressSync>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization or session setup fails.
    pub async fn new_sqlite(db_url: &str, config: RoomConfig) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Self::from_storage(storage, config).await
    }

    /// Build services over already-opened storage. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the identity cannot be resolved, the remote client cannot
    /// be built, or `config.minutes` is zero.
    pub async fn from_storage(
        mut storage: Storage,
        config: RoomConfig,
    ) -> Result<Self, AppServicesError> {
        if let Some(remote) = config.remote_progress {
            info!(base_url = %remote.base_url, "syncing progress with remote service");
            storage = storage.with_progress(Arc::new(HttpProgressRepository::new(remote)?));
        }

        let identity = if config.guest {
            None
        } else {
            Some(IdentityService::new(Arc::clone(&storage.identity)).ensure().await?)
        };

        let catalog = Arc::new(StageCatalog::standard());
        let verifier = Verifier::new(Sandbox::new(config.limits));
        let session = RoomSession::new(
            identity.clone(),
            Arc::clone(&catalog),
            verifier,
            config.minutes,
        )?
        .shared();
        let timer = Arc::new(TimerDriver::new(Arc::clone(&session)));
        let sync = Arc::new(ProgressSync::new(
            Arc::clone(&session),
            Arc::clone(&storage.progress),
            config.clock,
        ));

        Ok(Self {
            identity,
            catalog,
            session,
            timer,
            sync,
        })
    }

    #[must_use]
    pub fn identity(&self) -> Option<&LearnerId> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<StageCatalog> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn session(&self) -> SharedSession {
        Arc::clone(&self.session)
    }

    #[must_use]
    pub fn timer(&self) -> Arc<TimerDriver> {
        Arc::clone(&self.timer)
    }

    #[must_use]
    pub fn sync(&self) -> Arc<ProgressSync> {
        Arc::clone(&self.sync)
    }
}
