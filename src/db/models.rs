use sqlx::FromRow;

/// Separator between an archive path and the entry path inside it, as it
/// appears in `books.file_path` and in download URLs:
/// `archive.zip@inner/path.fb2`.
pub const ARCHIVE_SEPARATOR: char = '@';

/// Split a composite `archive.zip@inner/path` file path into
/// `(archive_path, inner_path)`. Returns `None` for plain file paths.
pub fn split_archive_path(file_path: &str) -> Option<(&str, &str)> {
    let (archive, inner) = file_path.split_once(ARCHIVE_SEPARATOR)?;
    if archive.is_empty() || inner.is_empty() {
        return None;
    }
    Some((archive, inner))
}

/// Join an archive path and an inner entry path into the composite form.
pub fn join_archive_path(archive: &str, inner: &str) -> String {
    format!("{archive}{ARCHIVE_SEPARATOR}{inner}")
}

/// Book format stored in `books.book_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookType {
    Fb2,
    Epub,
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookType::Fb2 => "fb2",
            BookType::Epub => "epub",
        }
    }

    /// MIME type used on acquisition links and download responses.
    /// FB2 files are always delivered zipped.
    pub fn download_mime(&self) -> &'static str {
        match self {
            BookType::Fb2 => "application/fb2+zip",
            BookType::Epub => "application/epub+zip",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "fb2" => Some(BookType::Fb2),
            "epub" => Some(BookType::Epub),
            _ => None,
        }
    }
}

impl TryFrom<&str> for BookType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        BookType::from_extension(value).ok_or_else(|| format!("unknown book type: {value}"))
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub title_normalized: String,
    pub annotation: String,
    pub language: String,
    pub book_date: String,
    pub document_date: String,
    pub added_date: String,
    pub doc_version: f64,
    pub book_type: String,
    pub file_path: String,
    pub file_name: String,
    pub document_size: i64,
    pub has_cover: bool,
    pub translators: String,
}

impl Book {
    pub fn book_type(&self) -> BookType {
        BookType::from_extension(&self.book_type).unwrap_or(BookType::Fb2)
    }
}

/// A fully-prepared candidate book, ready to be written in one transaction.
/// Produced by the ingest pipeline after alias resolution and genre
/// validation; `authors` are canonical names in file order.
#[derive(Debug, Clone)]
pub struct NewBook {
    pub id: String,
    pub title: String,
    pub title_normalized: String,
    pub annotation: String,
    pub language: String,
    pub book_date: String,
    pub document_date: String,
    pub added_date: String,
    pub doc_version: f64,
    pub book_type: BookType,
    pub file_path: String,
    pub file_name: String,
    pub document_size: i64,
    pub has_cover: bool,
    pub authors: Vec<String>,
    pub translators: Vec<String>,
    pub genres: Vec<String>,
    pub sequences: Vec<(String, i64)>,
}

impl NewBook {
    /// First author slot; every candidate has at least one ("Unknown" is
    /// synthesized upstream).
    pub fn primary_author(&self) -> &str {
        self.authors.first().map(String::as_str).unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub name_soundex: String,
    pub name_translit: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Genre {
    pub tag: String,
    pub english_name: String,
    pub translation: String,
    pub parent_tag: Option<String>,
}

impl Genre {
    /// Display label for the given 2-letter UI locale.
    pub fn label(&self, language: &str) -> &str {
        if language == "ru" && !self.translation.is_empty() {
            &self.translation
        } else {
            &self.english_name
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Sequence {
    pub id: i64,
    pub name: String,
    pub name_soundex: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_archive_path() {
        assert_eq!(
            split_archive_path("lib/books.zip@inner/war.fb2"),
            Some(("lib/books.zip", "inner/war.fb2"))
        );
        assert_eq!(split_archive_path("plain/war.fb2"), None);
        assert_eq!(split_archive_path("@inner.fb2"), None);
        assert_eq!(split_archive_path("books.zip@"), None);
    }

    #[test]
    fn test_join_archive_path_roundtrip() {
        let joined = join_archive_path("books.zip", "a/b.epub");
        assert_eq!(split_archive_path(&joined), Some(("books.zip", "a/b.epub")));
    }

    #[test]
    fn test_book_type_conversions() {
        assert_eq!(BookType::from_extension("fb2"), Some(BookType::Fb2));
        assert_eq!(BookType::from_extension("epub"), Some(BookType::Epub));
        assert_eq!(BookType::from_extension("mobi"), None);
        assert_eq!(BookType::Fb2.download_mime(), "application/fb2+zip");
        assert_eq!(BookType::Epub.download_mime(), "application/epub+zip");
        assert!(BookType::try_from("doc").is_err());
    }

    #[test]
    fn test_genre_label_locale() {
        let genre = Genre {
            tag: "sf".into(),
            english_name: "Science Fiction".into(),
            translation: "Фантастика".into(),
            parent_tag: None,
        };
        assert_eq!(genre.label("en"), "Science Fiction");
        assert_eq!(genre.label("ru"), "Фантастика");
        assert_eq!(genre.label("de"), "Science Fiction");
    }
}
