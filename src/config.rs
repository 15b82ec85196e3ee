use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::search::sort::SortOrder;

/// Selectable "new books" windows, in days.
pub const NEW_BOOKS_PERIODS: [i64; 7] = [7, 14, 21, 30, 44, 60, 90];

/// Bits of the `opds.structure` bitmap: each navigation endpoint of the
/// catalog root can be switched off individually.
pub mod structure {
    pub const NEW_DATE: u32 = 1;
    pub const NEW_TITLE: u32 = 1 << 1;
    pub const AUTHORS: u32 = 1 << 2;
    pub const SEQUENCES: u32 = 1 << 3;
    pub const GENRES: u32 = 1 << 4;
    pub const DOWNSTAT: u32 = 1 << 5;
    pub const ALL: u32 = NEW_DATE | NEW_TITLE | AUTHORS | SEQUENCES | GENRES | DOWNSTAT;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub opds: OpdsConfig,
    #[serde(default)]
    pub covers: CoversConfig,
    #[serde(default)]
    pub upnp: UpnpConfig,
    #[serde(default)]
    pub updates: UpdatesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Displayed in feed titles.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Path prefix for every listening route, no leading/trailing slashes.
    #[serde(default)]
    pub root_prefix: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 2-letter UI locale, used for genre labels.
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Connection URL override. Empty = `<uuid-v5(library path)>.db`.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub use_http_auth: bool,
    /// `user:pass;user2:pass2`. Hashed into memory at startup.
    #[serde(default)]
    pub credentials: String,
    #[serde(default = "default_true")]
    pub ban_clients: bool,
    #[serde(default = "default_wrong_attempts")]
    pub wrong_attempts_count: u32,
    #[serde(default)]
    pub remember_clients: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpdsConfig {
    #[serde(default = "default_sort_order")]
    pub sort_order: SortOrder,
    /// Index into [`NEW_BOOKS_PERIODS`].
    #[serde(default = "default_new_books_period")]
    pub new_books_period: usize,
    /// Navigation endpoint bitmap, see [`structure`].
    #[serde(default = "default_structure")]
    pub structure: u32,
    #[serde(default = "default_true")]
    pub use_authors_aliases: bool,
    /// When an author has only one kind of book view, redirect to the
    /// by-date listing rather than the alphabetic one.
    #[serde(default = "default_true")]
    pub prefer_date_views: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoversConfig {
    #[serde(default = "default_covers_path")]
    pub covers_path: PathBuf,
    #[serde(default = "default_cover_max_dimension_px")]
    pub cover_max_dimension_px: u32,
    #[serde(default = "default_cover_jpeg_quality")]
    pub cover_jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpnpConfig {
    // Recognized for compatibility; the port-forwarding helper itself is an
    // external collaborator.
    #[serde(default)]
    pub use_upnp: bool,
    #[serde(default)]
    pub open_nat_port: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdatesCheck {
    #[default]
    Never,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdatesConfig {
    #[serde(default)]
    pub check: UpdatesCheck,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.sanitize();
        Ok(config)
    }

    /// Reset out-of-range values to their defaults instead of failing.
    fn sanitize(&mut self) {
        if self.server.port == 0 {
            tracing::warn!("Invalid server.port 0, falling back to {}", default_port());
            self.server.port = default_port();
        }
        let prefix = self.server.root_prefix.trim_matches('/').to_string();
        if prefix != self.server.root_prefix {
            self.server.root_prefix = prefix;
        }
        if self.opds.new_books_period >= NEW_BOOKS_PERIODS.len() {
            tracing::warn!(
                "Invalid opds.new_books_period {}, falling back to {}",
                self.opds.new_books_period,
                default_new_books_period()
            );
            self.opds.new_books_period = default_new_books_period();
        }
        if self.auth.wrong_attempts_count == 0 {
            self.auth.wrong_attempts_count = default_wrong_attempts();
        }
    }

    /// Days in the configured "new books" window.
    pub fn new_books_days(&self) -> i64 {
        NEW_BOOKS_PERIODS[self.opds.new_books_period]
    }

    /// Whether a navigation endpoint bit is enabled.
    pub fn structure_has(&self, bit: u32) -> bool {
        self.opds.structure & bit != 0
    }

    /// Route prefix with a leading slash, or empty when unset.
    pub fn route_prefix(&self) -> String {
        if self.server.root_prefix.is_empty() {
            String::new()
        } else {
            format!("/{}", self.server.root_prefix)
        }
    }

    /// Parsed `user:pass` pairs from the credentials string.
    pub fn credential_pairs(&self) -> Vec<(String, String)> {
        self.auth
            .credentials
            .split(';')
            .filter_map(|pair| {
                let (user, pass) = pair.split_once(':')?;
                let user = user.trim();
                if user.is_empty() {
                    return None;
                }
                Some((user.to_string(), pass.to_string()))
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("library path does not exist: {0}")]
    LibraryPath(PathBuf),
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            use_http_auth: false,
            credentials: String::new(),
            ban_clients: true,
            wrong_attempts_count: default_wrong_attempts(),
            remember_clients: false,
        }
    }
}

impl Default for OpdsConfig {
    fn default() -> Self {
        Self {
            sort_order: default_sort_order(),
            new_books_period: default_new_books_period(),
            structure: default_structure(),
            use_authors_aliases: true,
            prefer_date_views: true,
        }
    }
}

impl Default for CoversConfig {
    fn default() -> Self {
        Self {
            covers_path: default_covers_path(),
            cover_max_dimension_px: default_cover_max_dimension_px(),
            cover_jpeg_quality: default_cover_jpeg_quality(),
        }
    }
}

// Default value functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_server_name() -> String {
    "TinyOPDS".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

fn default_wrong_attempts() -> u32 {
    3
}

fn default_sort_order() -> SortOrder {
    SortOrder::CyrillicFirst
}

fn default_new_books_period() -> usize {
    3 // 30 days
}

fn default_structure() -> u32 {
    structure::ALL
}

fn default_covers_path() -> PathBuf {
    PathBuf::from("covers")
}

fn default_cover_max_dimension_px() -> u32 {
    600
}

fn default_cover_jpeg_quality() -> u8 {
    85
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
[server]
[library]
path = "/books"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.name, "TinyOPDS");
        assert_eq!(config.server.root_prefix, "");
        assert_eq!(config.library.path, PathBuf::from("/books"));
        assert!(config.database.url.is_empty());
        assert!(!config.auth.use_http_auth);
        assert_eq!(config.auth.wrong_attempts_count, 3);
        assert_eq!(config.opds.sort_order, SortOrder::CyrillicFirst);
        assert_eq!(config.new_books_days(), 30);
        assert!(config.structure_has(structure::GENRES));
        assert_eq!(config.updates.check, UpdatesCheck::Never);
        assert_eq!(config.covers.cover_max_dimension_px, 600);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
host = "127.0.0.1"
port = 9090
name = "Home Library"
root_prefix = "books"
log_level = "debug"
language = "ru"

[library]
path = "/media/books"

[database]
url = "sqlite://lib.db"

[auth]
use_http_auth = true
credentials = "reader:secret;admin:hunter2"
ban_clients = true
wrong_attempts_count = 5
remember_clients = true

[opds]
sort_order = "latin-first"
new_books_period = 6
structure = 7
use_authors_aliases = false
prefer_date_views = false

[covers]
covers_path = "/tmp/covers"
cover_max_dimension_px = 512
cover_jpeg_quality = 80

[upnp]
use_upnp = true
open_nat_port = true

[updates]
check = "weekly"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.name, "Home Library");
        assert_eq!(config.route_prefix(), "/books");
        assert_eq!(config.server.language, "ru");
        assert_eq!(config.database.url, "sqlite://lib.db");
        assert!(config.auth.use_http_auth);
        assert_eq!(
            config.credential_pairs(),
            vec![
                ("reader".to_string(), "secret".to_string()),
                ("admin".to_string(), "hunter2".to_string())
            ]
        );
        assert_eq!(config.opds.sort_order, SortOrder::LatinFirst);
        assert_eq!(config.new_books_days(), 90);
        assert!(config.structure_has(structure::NEW_DATE));
        assert!(!config.structure_has(structure::SEQUENCES));
        assert!(!config.opds.use_authors_aliases);
        assert!(config.upnp.use_upnp);
        assert_eq!(config.updates.check, UpdatesCheck::Weekly);
    }

    #[test]
    fn test_sanitize_resets_invalid_values() {
        let toml_str = r#"
[server]
port = 0
root_prefix = "/opds/"
[library]
path = "/books"
[opds]
new_books_period = 99
[auth]
wrong_attempts_count = 0
"#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        config.sanitize();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.root_prefix, "opds");
        assert_eq!(config.new_books_days(), 30);
        assert_eq!(config.auth.wrong_attempts_count, 3);
    }

    #[test]
    fn test_credential_pairs_skip_malformed_entries() {
        let toml_str = r#"
[server]
[library]
path = "/books"
[auth]
credentials = "alice:pw;;broken;:nopass;bob:"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.credential_pairs(),
            vec![
                ("alice".to_string(), "pw".to_string()),
                ("bob".to_string(), String::new())
            ]
        );
    }
}
