//! Cyrillic <-> Latin transliteration tables.
//!
//! Two fixed tables are carried: GOST 16876-71 (reversible, used for
//! back-translating search queries typed in Latin) and ISO 9 (ASCII variant,
//! used as soundex input). Forward transliteration is a per-character
//! substitution; back-transliteration is a greedy longest-match over
//! 3/2/1-character windows.

/// Which substitution table to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Gost,
    Iso9,
}

/// GOST 16876-71, lowercase pairs. Multi-letter sequences are chosen so that
/// the greedy back pass restores the original Cyrillic characters.
const GOST: &[(&str, &str)] = &[
    ("а", "a"),
    ("б", "b"),
    ("в", "v"),
    ("г", "g"),
    ("д", "d"),
    ("е", "e"),
    ("ё", "jo"),
    ("ж", "zh"),
    ("з", "z"),
    ("и", "i"),
    ("й", "jj"),
    ("к", "k"),
    ("л", "l"),
    ("м", "m"),
    ("н", "n"),
    ("о", "o"),
    ("п", "p"),
    ("р", "r"),
    ("с", "s"),
    ("т", "t"),
    ("у", "u"),
    ("ф", "f"),
    ("х", "kh"),
    ("ц", "c"),
    ("ч", "ch"),
    ("ш", "sh"),
    ("щ", "shh"),
    ("ъ", "\""),
    ("ы", "y"),
    ("ь", "'"),
    ("э", "eh"),
    ("ю", "ju"),
    ("я", "ja"),
];

/// ISO 9 ASCII variant, lowercase pairs.
const ISO9: &[(&str, &str)] = &[
    ("а", "a"),
    ("б", "b"),
    ("в", "v"),
    ("г", "g"),
    ("д", "d"),
    ("е", "e"),
    ("ё", "yo"),
    ("ж", "zh"),
    ("з", "z"),
    ("и", "i"),
    ("й", "j"),
    ("к", "k"),
    ("л", "l"),
    ("м", "m"),
    ("н", "n"),
    ("о", "o"),
    ("п", "p"),
    ("р", "r"),
    ("с", "s"),
    ("т", "t"),
    ("у", "u"),
    ("ф", "f"),
    ("х", "h"),
    ("ц", "c"),
    ("ч", "ch"),
    ("ш", "sh"),
    ("щ", "shh"),
    ("ъ", "''"),
    ("ы", "y"),
    ("ь", "'"),
    ("э", "e"),
    ("ю", "yu"),
    ("я", "ya"),
];

fn pairs(table: Table) -> &'static [(&'static str, &'static str)] {
    match table {
        Table::Gost => GOST,
        Table::Iso9 => ISO9,
    }
}

/// Transliterate Cyrillic characters to Latin. Unmapped characters pass
/// through unchanged; an uppercase Cyrillic letter capitalizes the first
/// letter of its replacement.
pub fn front(s: &str, table: Table) -> String {
    let map = pairs(table);
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let lower: String = c.to_lowercase().collect();
        match map.iter().find(|(cyr, _)| **cyr == *lower) {
            Some((_, latin)) => {
                if c.is_uppercase() {
                    let mut chars = latin.chars();
                    if let Some(first) = chars.next() {
                        out.extend(first.to_uppercase());
                        out.push_str(chars.as_str());
                    }
                } else {
                    out.push_str(latin);
                }
            }
            None => out.push(c),
        }
    }
    out
}

/// Back-translate a Latin string to Cyrillic using greedy longest-match over
/// 3-, then 2-, then 1-character windows. Unmatched characters pass through.
pub fn back(s: &str, table: Table) -> String {
    let map = pairs(table);
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        let mut matched = false;
        for window in (1..=3).rev() {
            if i + window > chars.len() {
                continue;
            }
            let slice: String = chars[i..i + window].iter().collect();
            let lower = slice.to_lowercase();
            if let Some((cyr, _)) = map.iter().find(|(_, latin)| **latin == lower) {
                if chars[i].is_uppercase() {
                    out.extend(cyr.chars().flat_map(|c| c.to_uppercase()));
                } else {
                    out.push_str(cyr);
                }
                i += window;
                matched = true;
                break;
            }
        }
        if !matched {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_gost() {
        assert_eq!(front("щука", Table::Gost), "shhuka");
        assert_eq!(front("Пушкин", Table::Gost), "Pushkin");
        assert_eq!(front("Эхо", Table::Gost), "Ehkho");
    }

    #[test]
    fn test_front_iso9() {
        assert_eq!(front("Фёдор", Table::Iso9), "Fyodor");
        assert_eq!(front("Хрущёв", Table::Iso9), "Hrushhyov");
    }

    #[test]
    fn test_front_passes_latin_through() {
        assert_eq!(front("Tolstoy 42", Table::Gost), "Tolstoy 42");
        assert_eq!(front("Tolstoy 42", Table::Iso9), "Tolstoy 42");
    }

    #[test]
    fn test_back_greedy_longest_match() {
        // "shh" must win over "sh" followed by stray "h"
        assert_eq!(back("shhuka", Table::Gost), "щука");
        assert_eq!(back("zhizn'", Table::Gost), "жизнь");
        assert_eq!(back("Pushkin", Table::Gost), "Пушкин");
    }

    #[test]
    fn test_gost_roundtrip_restores_cyrillic() {
        for s in ["война и мир", "щи да каша", "подъезд", "Лев Толстой"] {
            assert_eq!(back(&front(s, Table::Gost), Table::Gost), s, "input {s:?}");
        }
    }

    #[test]
    fn test_back_case_preserved_on_first_letter() {
        assert_eq!(back("Zhar", Table::Gost), "Жар");
    }
}
