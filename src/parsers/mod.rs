pub mod epub;
pub mod fb2;

/// Metadata extracted from a single book file. This is the parser output
/// contract: the ingest pipeline turns it into a store candidate.
#[derive(Debug, Clone, Default)]
pub struct ParsedBook {
    /// Publisher book id from FB2 document-info, if present.
    pub id: Option<String>,
    pub title: String,
    /// Person names as found in the file, "First Middle Last" order.
    pub authors: Vec<String>,
    pub translators: Vec<String>,
    pub genres: Vec<String>,
    /// `(name, number)` pairs; a book may belong to several series.
    pub sequences: Vec<(String, i64)>,
    pub annotation: String,
    pub language: String,
    /// Publication year from title-info.
    pub book_date: String,
    /// Metadata version timestamp from document-info.
    pub document_date: String,
    pub doc_version: f64,
    pub has_cover: bool,
}

/// Strip leading/trailing whitespace and common punctuation from metadata
/// strings.
pub fn strip_meta(s: &str) -> String {
    s.trim_matches(|c: char| {
        c.is_whitespace()
            || matches!(
                c,
                '»' | '«' | '\'' | '"' | '&' | '-' | '.' | '#' | '\\' | '`' | ';'
            )
    })
    .to_string()
}

pub fn is_cyrillic(c: char) -> bool {
    matches!(c, '\u{0400}'..='\u{04FF}' | '\u{0500}'..='\u{052F}')
}

pub fn has_cyrillic(s: &str) -> bool {
    s.chars().any(is_cyrillic)
}

/// Capitalize each word: first letter uppercase, rest lowercase.
pub fn capitalize_words(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a person name to the canonical "Last First Middle" form,
/// capitalized. Comma-separated names ("Last, First") are already in
/// surname-first order; otherwise the last word moves to the front.
pub fn normalize_person_name(name: &str) -> String {
    let name = strip_meta(&name.split_whitespace().collect::<Vec<_>>().join(" "));
    if name.is_empty() {
        return String::new();
    }
    if name.contains(',') {
        let flattened = name
            .replace(',', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        return capitalize_words(&flattened);
    }
    let parts: Vec<&str> = name.split_whitespace().collect();
    if parts.len() <= 1 {
        return capitalize_words(&name);
    }
    let last = parts[parts.len() - 1];
    let rest = &parts[..parts.len() - 1];
    capitalize_words(&format!("{} {}", last, rest.join(" ")))
}

/// Duplicate-detection normalization: lowercase, trim, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_meta() {
        assert_eq!(strip_meta("  «Война и мир»  "), "Война и мир");
        assert_eq!(strip_meta("#tag."), "tag");
        assert_eq!(strip_meta(""), "");
    }

    #[test]
    fn test_normalize_person_name_reorders_last_word() {
        assert_eq!(
            normalize_person_name("лев николаевич толстой"),
            "Толстой Лев Николаевич"
        );
        assert_eq!(normalize_person_name("Jane Doe"), "Doe Jane");
    }

    #[test]
    fn test_normalize_person_name_comma_form() {
        assert_eq!(normalize_person_name("Doe, Jane"), "Doe Jane");
    }

    #[test]
    fn test_normalize_person_name_single_word_and_empty() {
        assert_eq!(normalize_person_name("HOMER"), "Homer");
        assert_eq!(normalize_person_name("  "), "");
    }

    #[test]
    fn test_normalize_title_is_stable() {
        let normalized = normalize_title("  Война   и МИР ");
        assert_eq!(normalized, "война и мир");
        assert_eq!(normalize_title(&normalized), normalized);
    }

    #[test]
    fn test_has_cyrillic() {
        assert!(has_cyrillic("Пушкин A."));
        assert!(!has_cyrillic("Pushkin"));
    }
}
