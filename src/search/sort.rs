//! Culture-aware ordering for catalog listings.
//!
//! Letters sort before digits, digits before punctuation, and when the
//! Cyrillic-first order is configured, codepoints at or above U+0400 sort
//! before Latin letters. This is an explicit comparator rather than locale
//! collation so that feeds are byte-stable across platforms.

use std::cmp::Ordering;

/// Configured sort order for mixed-script listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    LatinFirst,
    CyrillicFirst,
}

impl SortOrder {
    pub fn cyrillic_first(&self) -> bool {
        matches!(self, SortOrder::CyrillicFirst)
    }
}

fn is_cyrillic(c: char) -> bool {
    c >= '\u{0400}'
}

/// Sort key for one character: character class, script rank, folded
/// codepoint.
fn char_key(c: char, cyrillic_first: bool) -> (u8, u8, u32) {
    let class = if c.is_alphabetic() {
        0
    } else if c.is_ascii_digit() {
        1
    } else {
        2
    };
    let script = if class == 0 && cyrillic_first {
        if is_cyrillic(c) { 0 } else { 1 }
    } else {
        0
    };
    let folded = c.to_lowercase().next().unwrap_or(c) as u32;
    (class, script, folded)
}

/// Compare two strings under the culture-aware order.
pub fn compare(a: &str, b: &str, order: SortOrder) -> Ordering {
    let cyr = order.cyrillic_first();
    let mut ia = a.chars();
    let mut ib = b.chars();
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                let cmp = char_key(ca, cyr).cmp(&char_key(cb, cyr));
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
        }
    }
}

/// Sort and deduplicate a list of strings in place.
pub fn sort_dedup(items: &mut Vec<String>, order: SortOrder) {
    items.sort_by(|a, b| compare(a, b, order));
    items.dedup();
}

/// Sort a list of keyed items by their key under the culture-aware order.
pub fn sort_by_key<T, F>(items: &mut [T], order: SortOrder, mut key: F)
where
    F: FnMut(&T) -> String,
{
    items.sort_by(|a, b| compare(&key(a), &key(b), order));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_before_digits_before_punctuation() {
        let mut items: Vec<String> = vec!["1984".into(), "...And More".into(), "Anna".into()];
        sort_dedup(&mut items, SortOrder::LatinFirst);
        assert_eq!(items, vec!["Anna", "1984", "...And More"]);
    }

    #[test]
    fn test_cyrillic_first_order() {
        let mut items: Vec<String> = vec!["Abram".into(), "Яшин".into(), "Иванов".into()];
        sort_dedup(&mut items, SortOrder::CyrillicFirst);
        assert_eq!(items, vec!["Иванов", "Яшин", "Abram"]);
    }

    #[test]
    fn test_latin_first_order_is_codepoint_based() {
        let mut items: Vec<String> = vec!["Иванов".into(), "Abram".into()];
        sort_dedup(&mut items, SortOrder::LatinFirst);
        assert_eq!(items, vec!["Abram", "Иванов"]);
    }

    #[test]
    fn test_case_insensitive_within_class() {
        assert_eq!(
            compare("abc", "ABC", SortOrder::LatinFirst),
            std::cmp::Ordering::Equal
        );
        assert_eq!(
            compare("abc", "abd", SortOrder::LatinFirst),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn test_dedup_removes_exact_duplicates() {
        let mut items: Vec<String> = vec!["Same".into(), "Same".into(), "Other".into()];
        sort_dedup(&mut items, SortOrder::LatinFirst);
        assert_eq!(items, vec!["Other", "Same"]);
    }
}
