use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;
use tracing::warn;

use crate::db::DbPool;
use crate::parsers::has_cyrillic;

/// Embedded alias table, gzip-compressed: `alias|canonical` per line.
const ALIASES_GZ: &[u8] = include_bytes!("../data/aliases.txt.gz");

/// Maps author-name variants to canonical names. Applied at write time
/// only; names read back from the store are already canonical and are never
/// re-resolved.
pub struct AliasTable {
    map: HashMap<String, String>,
    /// canonical -> variants, kept for diagnostics.
    reverse: HashMap<String, Vec<String>>,
}

impl AliasTable {
    pub fn empty() -> Self {
        Self {
            map: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut map = HashMap::new();
        let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
        for (alias, canonical) in pairs {
            reverse
                .entry(canonical.clone())
                .or_default()
                .push(alias.clone());
            map.insert(alias, canonical);
        }
        Self { map, reverse }
    }

    /// Decompress and parse the embedded table.
    pub fn load_embedded() -> Self {
        let mut text = String::new();
        if GzDecoder::new(ALIASES_GZ).read_to_string(&mut text).is_err() {
            warn!("Embedded alias table is corrupt; aliases disabled");
            return Self::empty();
        }
        let pairs = text
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let (alias, canonical) = line.split_once('|')?;
                let alias = alias.trim();
                let canonical = canonical.trim();
                if alias.is_empty() || canonical.is_empty() {
                    return None;
                }
                Some((alias.to_string(), canonical.to_string()))
            })
            .collect();
        Self::from_pairs(pairs)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Resolve one author name. The alias applies only when the book has at
    /// least one Cyrillic author and the name itself is Cyrillic, so Latin
    /// homographs never collide.
    pub fn resolve(&self, name: &str, book_has_cyrillic: bool) -> String {
        if book_has_cyrillic && has_cyrillic(name) {
            if let Some(canonical) = self.map.get(name) {
                return canonical.clone();
            }
        }
        name.to_string()
    }

    /// Known variants of a canonical name (diagnostics only).
    pub fn variants(&self, canonical: &str) -> &[String] {
        self.reverse
            .get(canonical)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Mirror the table into the read-only `aliases` store table.
    pub async fn seed(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        for (alias, canonical) in &self.map {
            sqlx::query("INSERT OR IGNORE INTO aliases (alias_name, canonical_name) VALUES (?, ?)")
                .bind(alias)
                .bind(canonical)
                .execute(pool)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_embedded_table() {
        let table = AliasTable::load_embedded();
        assert!(table.len() > 10);
        assert_eq!(
            table.resolve("Достоевский Федор Михайлович", true),
            "Достоевский Фёдор Михайлович"
        );
    }

    #[test]
    fn test_resolve_requires_cyrillic_book() {
        let table = AliasTable::load_embedded();
        // Same name, but the book has no Cyrillic author slot at all.
        assert_eq!(
            table.resolve("Достоевский Федор Михайлович", false),
            "Достоевский Федор Михайлович"
        );
    }

    #[test]
    fn test_resolve_is_idempotent_on_canonical_names() {
        let table = AliasTable::load_embedded();
        let canonical = table.resolve("Толстой Лев", true);
        assert_eq!(table.resolve(&canonical, true), canonical);
    }

    #[test]
    fn test_unknown_names_pass_through() {
        let table = AliasTable::load_embedded();
        assert_eq!(table.resolve("Неизвестный Автор", true), "Неизвестный Автор");
        assert_eq!(table.resolve("John Doe", true), "John Doe");
    }

    #[test]
    fn test_reverse_map_lists_variants() {
        let table = AliasTable::from_pairs(vec![
            ("A".to_string(), "C".to_string()),
            ("B".to_string(), "C".to_string()),
        ]);
        let mut variants = table.variants("C").to_vec();
        variants.sort();
        assert_eq!(variants, vec!["A".to_string(), "B".to_string()]);
        assert!(table.variants("X").is_empty());
    }
}
