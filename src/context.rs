//! Process-scoped services, created once at startup and passed explicitly.

use std::sync::Arc;

use crate::aggregator::{AggregatorClient, ChallengeSolver};
use crate::blocklist::Blocklist;
use crate::credentials::Credentials;
use crate::db::Database;
use crate::download::{ExternalClients, MegaSessionCache};
use crate::events::EventBus;
use crate::library::{FilesStore, RootFolders, VolumeStore};
use crate::settings::SettingsService;

/// Everything long-lived the pipeline needs: stores, clients and caches.
/// Cloning is cheap; the fields share their underlying state.
#[derive(Debug, Clone)]
pub struct Services {
    pub db: Database,
    pub http: reqwest::Client,
    pub settings: SettingsService,
    pub volumes: VolumeStore,
    pub files: FilesStore,
    pub root_folders: RootFolders,
    pub blocklist: Blocklist,
    pub credentials: Credentials,
    pub external_clients: ExternalClients,
    pub aggregator: AggregatorClient,
    pub solver: Arc<ChallengeSolver>,
    pub events: EventBus,
    pub mega_sessions: Arc<MegaSessionCache>,
}

impl Services {
    /// Wires up all services over one database and settings document.
    #[must_use]
    pub fn new(db: Database, settings: SettingsService) -> Self {
        let http = reqwest::Client::new();
        let solver = Arc::new(ChallengeSolver::new());
        let aggregator = AggregatorClient::new(
            http.clone(),
            settings.get().aggregator_base_url,
            solver.clone(),
        );

        Self {
            volumes: VolumeStore::new(db.clone()),
            files: FilesStore::new(db.clone()),
            root_folders: RootFolders::new(db.clone()),
            blocklist: Blocklist::new(db.clone()),
            credentials: Credentials::new(db.clone()),
            external_clients: ExternalClients::new(db.clone()),
            aggregator,
            solver,
            events: EventBus::new(),
            mega_sessions: Arc::new(MegaSessionCache::new()),
            http,
            settings,
            db,
        }
    }
}
