//! Request statistics for the HTTP front.
//!
//! Counters are atomics, the unique-client set is a concurrent map, and a
//! broadcast fires after every recorded request so observers can refresh
//! without polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;

pub struct ServerStats {
    requests: AtomicU64,
    books_served: AtomicU64,
    images_served: AtomicU64,
    good_logins: AtomicU64,
    bad_logins: AtomicU64,
    banned_clients: AtomicU64,
    unique_clients: DashMap<String, ()>,
    updated: broadcast::Sender<()>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub books_served: u64,
    pub images_served: u64,
    pub unique_clients: u64,
    pub good_logins: u64,
    pub bad_logins: u64,
    pub banned_clients: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        let (updated, _) = broadcast::channel(16);
        Self {
            requests: AtomicU64::new(0),
            books_served: AtomicU64::new(0),
            images_served: AtomicU64::new(0),
            good_logins: AtomicU64::new(0),
            bad_logins: AtomicU64::new(0),
            banned_clients: AtomicU64::new(0),
            unique_clients: DashMap::new(),
            updated,
        }
    }

    /// Count one handled request and remember the client address.
    pub fn record_request(&self, client: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if client != "-" {
            self.unique_clients.insert(client.to_string(), ());
        }
        let _ = self.updated.send(());
    }

    pub fn record_book_served(&self) {
        self.books_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image_served(&self) {
        self.images_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_good_login(&self) {
        self.good_logins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad_login(&self) {
        self.bad_logins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ban(&self) {
        self.banned_clients.fetch_add(1, Ordering::Relaxed);
    }

    /// Fires after each recorded request.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.updated.subscribe()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            books_served: self.books_served.load(Ordering::Relaxed),
            images_served: self.images_served.load(Ordering::Relaxed),
            unique_clients: self.unique_clients.len() as u64,
            good_logins: self.good_logins.load(Ordering::Relaxed),
            bad_logins: self.bad_logins.load(Ordering::Relaxed),
            banned_clients: self.banned_clients.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic log line with the current counters. Runs until the process
/// exits.
pub async fn emit_periodic(stats: Arc<ServerStats>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await; // first tick fires immediately; skip it
    loop {
        interval.tick().await;
        let s = stats.snapshot();
        info!(
            "Requests: {} (books {}, images {}, clients {}, logins {}/{} good/bad, banned {})",
            s.requests,
            s.books_served,
            s.images_served,
            s.unique_clients,
            s.good_logins,
            s.bad_logins,
            s.banned_clients
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = ServerStats::new();
        stats.record_request("1.2.3.4");
        stats.record_request("1.2.3.4");
        stats.record_request("5.6.7.8");
        stats.record_book_served();
        stats.record_image_served();
        stats.record_good_login();
        stats.record_bad_login();
        stats.record_ban();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.unique_clients, 2);
        assert_eq!(snapshot.books_served, 1);
        assert_eq!(snapshot.images_served, 1);
        assert_eq!(snapshot.good_logins, 1);
        assert_eq!(snapshot.bad_logins, 1);
        assert_eq!(snapshot.banned_clients, 1);
    }

    #[test]
    fn test_unknown_client_not_counted_as_unique() {
        let stats = ServerStats::new();
        stats.record_request("-");
        assert_eq!(stats.snapshot().unique_clients, 0);
        assert_eq!(stats.snapshot().requests, 1);
    }

    #[tokio::test]
    async fn test_update_event_fires_on_request() {
        let stats = ServerStats::new();
        let mut rx = stats.subscribe();
        stats.record_request("1.2.3.4");
        assert!(rx.try_recv().is_ok());
    }
}
