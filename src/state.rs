use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db::DbPool;
use crate::ingest::GenreIndex;
use crate::ingest::aliases::AliasTable;
use crate::ingest::scanner::ScannerControl;
use crate::ingest::watcher::WatcherControl;
use crate::opds::auth::{ClientGuard, Credentials};
use crate::server_stats::ServerStats;
use crate::stats::StatsCache;

/// Shared application state: the composition root wires every service here
/// once, and the router carries clones.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbPool,
    pub stats: Arc<StatsCache>,
    pub server_stats: Arc<ServerStats>,
    pub aliases: Arc<AliasTable>,
    pub genres: Arc<GenreIndex>,
    pub credentials: Arc<Credentials>,
    pub guard: Arc<ClientGuard>,
    pub scanner: Arc<ScannerControl>,
    pub watcher: Arc<WatcherControl>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let credentials = Credentials::from_pairs(config.credential_pairs());
        let guard = ClientGuard::new(
            config.auth.ban_clients,
            config.auth.wrong_attempts_count,
            config.auth.remember_clients,
        );
        let aliases = if config.opds.use_authors_aliases {
            AliasTable::load_embedded()
        } else {
            AliasTable::empty()
        };

        Self {
            config: Arc::new(config),
            db,
            stats: Arc::new(StatsCache::new()),
            server_stats: Arc::new(ServerStats::new()),
            aliases: Arc::new(aliases),
            genres: Arc::new(GenreIndex::from_embedded()),
            credentials: Arc::new(credentials),
            guard: Arc::new(guard),
            scanner: Arc::new(ScannerControl::new()),
            watcher: Arc::new(WatcherControl::new()),
            started_at: Instant::now(),
        }
    }

    /// RFC 3339 cutoff for the configured "new books" window.
    pub fn new_books_cutoff(&self) -> String {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.new_books_days());
        cutoff.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}
