use std::collections::HashMap;
use std::time::{Duration, Instant};

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use dashmap::DashMap;

use crate::state::AppState;

/// How long a banned client stays blocked.
const BAN_DURATION: Duration = Duration::from_secs(30 * 60);

/// Hash a plaintext password using Argon2id with a random salt.
pub fn hash(password: &str) -> String {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .expect("Argon2 hashing should not fail")
        .to_string()
}

/// Verify a plaintext password against a stored hash.
pub fn verify(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// In-memory credentials table. The `user:pass;...` config string is
/// hashed at startup; plaintext passwords are not retained.
pub struct Credentials {
    users: HashMap<String, String>,
}

impl Credentials {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let users = pairs
            .into_iter()
            .map(|(user, pass)| (user, hash(&pass)))
            .collect();
        Self { users }
    }

    pub fn empty() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn check(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(stored) => verify(password, stored),
            None => false,
        }
    }
}

/// Per-client auth bookkeeping: failed-attempt counters, the timed ban
/// list, and the remembered-clients set.
pub struct ClientGuard {
    ban_enabled: bool,
    max_attempts: u32,
    remember_enabled: bool,
    attempts: DashMap<String, u32>,
    banned_until: DashMap<String, Instant>,
    remembered: DashMap<String, ()>,
}

impl ClientGuard {
    pub fn new(ban_enabled: bool, max_attempts: u32, remember_enabled: bool) -> Self {
        Self {
            ban_enabled,
            max_attempts: max_attempts.max(1),
            remember_enabled,
            attempts: DashMap::new(),
            banned_until: DashMap::new(),
            remembered: DashMap::new(),
        }
    }

    pub fn is_banned(&self, client: &str) -> bool {
        if let Some(until) = self.banned_until.get(client) {
            if until.value().elapsed() < BAN_DURATION {
                return true;
            }
        }
        self.banned_until.remove(client);
        false
    }

    /// Count a failed login. Returns `true` when this failure triggered a
    /// ban.
    pub fn record_failure(&self, client: &str) -> bool {
        if !self.ban_enabled {
            return false;
        }
        let mut count = self.attempts.entry(client.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.max_attempts {
            drop(count);
            self.attempts.remove(client);
            self.banned_until.insert(client.to_string(), Instant::now());
            return true;
        }
        false
    }

    pub fn record_success(&self, client: &str) {
        self.attempts.remove(client);
        if self.remember_enabled {
            self.remembered.insert(client.to_string(), ());
        }
    }

    pub fn is_remembered(&self, client: &str) -> bool {
        self.remember_enabled && self.remembered.contains_key(client)
    }
}

/// Client key for counters and the ban list: the remote socket address.
pub fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "-".into())
}

/// Axum middleware layer for HTTP Basic Authentication with client
/// banning. Banned clients get 403 before anything else runs.
pub async fn basic_auth_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);

    if state.guard.is_banned(&client) {
        return (StatusCode::FORBIDDEN, "Banned").into_response();
    }

    if !state.config.auth.use_http_auth || state.guard.is_remembered(&client) {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let credentials = auth_header
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok());

    match credentials.as_deref().and_then(|c| c.split_once(':')) {
        Some((username, password)) if state.credentials.check(username, password) => {
            state.server_stats.record_good_login();
            state.guard.record_success(&client);
            next.run(request).await
        }
        Some(_) | None => {
            state.server_stats.record_bad_login();
            if state.guard.record_failure(&client) {
                state.server_stats.record_ban();
                return (StatusCode::FORBIDDEN, "Banned").into_response();
            }
            unauthorized_response()
        }
    }
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"TinyOPDS\"")],
        "Authorization Required",
    )
        .into_response()
}
