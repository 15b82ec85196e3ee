use std::io::BufRead;

use base64::Engine;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{ParsedBook, strip_meta};

/// Parse the FB2 `<description>` header and return extracted metadata.
/// The body is never visited; cover bytes are extracted separately on
/// demand by [`extract_cover`]. Tolerant of malformed XML: returns partial
/// metadata on parse errors.
pub fn parse(mut reader: impl BufRead) -> Result<ParsedBook, quick_xml::Error> {
    let mut raw_data = Vec::new();
    if reader.read_to_end(&mut raw_data).is_err() {
        return Ok(ParsedBook::default());
    }
    Ok(parse_description(&raw_data))
}

fn parse_description(raw_data: &[u8]) -> ParsedBook {
    let mut meta = ParsedBook::default();
    let mut xml = Reader::from_reader(std::io::Cursor::new(raw_data));
    xml.config_mut().trim_text(true);
    xml.config_mut().check_end_names = false;
    xml.config_mut().check_comments = false;

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();

    // Temp state for person parsing (<author> and <translator> share shape)
    let mut person_first = String::new();
    let mut person_middle = String::new();
    let mut person_last = String::new();

    let mut in_annotation = false;
    let mut annotation_parts: Vec<String> = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Err(_) => break, // Tolerate malformed XML, return partial metadata

            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                handle_open_tag(&local, e, xml.decoder(), &path, &mut meta);
                path.push(local);

                if matches_path(&path, &["description", "title-info", "annotation"]) {
                    in_annotation = true;
                }
            }

            Ok(Event::Empty(ref e)) => {
                let local = local_name(e.name().as_ref());
                // Handle attributes but don't push to path (self-closing)
                handle_open_tag(&local, e, xml.decoder(), &path, &mut meta);
            }

            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());

                // Commit person when </author> or </translator> closes
                if (local == "author" || local == "translator")
                    && path_contains(&path, "title-info")
                {
                    let full = join_person(&person_first, &person_middle, &person_last);
                    if !full.is_empty() {
                        if local == "author" {
                            meta.authors.push(full);
                        } else {
                            meta.translators.push(full);
                        }
                    }
                    person_first.clear();
                    person_middle.clear();
                    person_last.clear();
                }

                if local == "annotation" {
                    in_annotation = false;
                    meta.annotation = annotation_parts.join("\n");
                }

                if !path.is_empty() {
                    path.pop();
                }

                // Metadata lives entirely inside <description>; stop here
                // so the body is never read.
                if local == "description" {
                    break;
                }
            }

            Ok(Event::Text(ref e)) => {
                let text = e.decode().unwrap_or_default();
                let tag = path.last().map(|s| s.as_str()).unwrap_or("");

                if tag == "book-title"
                    && matches_path(&path, &["description", "title-info", "book-title"])
                {
                    meta.title = strip_meta(&text);
                } else if tag == "genre"
                    && matches_path(&path, &["description", "title-info", "genre"])
                {
                    let g = text.trim().to_lowercase();
                    if !g.is_empty() {
                        meta.genres.push(g);
                    }
                } else if tag == "lang"
                    && matches_path(&path, &["description", "title-info", "lang"])
                {
                    meta.language = strip_meta(&text).to_lowercase();
                } else if in_person(&path, tag, "first-name") {
                    person_first.push_str(&text);
                } else if in_person(&path, tag, "middle-name") {
                    person_middle.push_str(&text);
                } else if in_person(&path, tag, "last-name") {
                    person_last.push_str(&text);
                } else if tag == "date"
                    && matches_path(&path, &["description", "title-info", "date"])
                {
                    if meta.book_date.is_empty() {
                        meta.book_date = strip_meta(&text);
                    }
                } else if tag == "date"
                    && matches_path(&path, &["description", "document-info", "date"])
                {
                    if meta.document_date.is_empty() {
                        meta.document_date = strip_meta(&text);
                    }
                } else if tag == "id"
                    && matches_path(&path, &["description", "document-info", "id"])
                {
                    let id = strip_meta(&text);
                    if !id.is_empty() {
                        meta.id = Some(id);
                    }
                } else if tag == "version"
                    && matches_path(&path, &["description", "document-info", "version"])
                {
                    meta.doc_version = strip_meta(&text).parse::<f64>().unwrap_or(0.0);
                } else if in_annotation {
                    let t = text.trim().to_string();
                    if !t.is_empty() {
                        annotation_parts.push(t);
                    }
                }
            }

            _ => {}
        }
        buf.clear();
    }

    meta
}

fn join_person(first: &str, middle: &str, last: &str) -> String {
    // Parsers emit "First Middle Last"; canonical reordering happens in the
    // ingest pipeline.
    let parts: Vec<String> = [first, middle, last]
        .iter()
        .map(|p| strip_meta(p))
        .filter(|p| !p.is_empty())
        .collect();
    parts.join(" ")
}

fn in_person(path: &[String], tag: &str, name_part: &str) -> bool {
    tag == name_part
        && (path_contains(path, "author") || path_contains(path, "translator"))
        && path_contains(path, "title-info")
}

/// Extract the cover image from raw FB2 bytes: resolve the coverpage
/// reference, then find the matching `<binary>` element. The raw byte
/// search is more reliable than XML parsing for malformed files.
pub fn extract_cover(data: &[u8]) -> Option<(Vec<u8>, String)> {
    let cover_id = find_cover_ref(data)?;
    extract_binary(data, &cover_id)
}

/// Find the cover reference id from `<coverpage><image href="#id"/>`.
fn find_cover_ref(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    let cp_start = text.find("<coverpage")?;
    let cp_end = text[cp_start..].find("</coverpage>")? + cp_start;
    let coverpage = &text[cp_start..cp_end];

    let img_start = coverpage.find("<image")?;
    let img_end = coverpage[img_start..].find('>')? + img_start;
    let img_tag = &coverpage[img_start..=img_end];

    let href_pos = img_tag.find("href=\"")?;
    let val_start = href_pos + 6;
    let val_end = img_tag[val_start..].find('"')? + val_start;
    let href = &img_tag[val_start..val_end];

    let id = href.trim_start_matches('#').to_lowercase();
    if id.is_empty() { None } else { Some(id) }
}

/// Find the `<binary id="...">` element matching the cover reference and
/// decode its base64 payload.
fn extract_binary(data: &[u8], cover_id: &str) -> Option<(Vec<u8>, String)> {
    let text = String::from_utf8_lossy(data);
    let cover_id_lower = cover_id.to_lowercase();
    let mut search_pos = 0;

    while let Some(bin_start) = text[search_pos..].find("<binary ") {
        let abs_start = search_pos + bin_start;
        let tag_end = match text[abs_start..].find('>') {
            Some(p) => abs_start + p,
            None => {
                search_pos = abs_start + 1;
                continue;
            }
        };

        let tag = &text[abs_start..=tag_end];
        let has_match = extract_attr_value(tag, "id")
            .map(|id| id.to_lowercase() == cover_id_lower)
            .unwrap_or(false);

        if has_match {
            let content_start = tag_end + 1;
            if let Some(close_pos) = text[content_start..].find("</binary>") {
                let b64_text = &text[content_start..content_start + close_pos];
                let clean: String = b64_text.chars().filter(|c| !c.is_whitespace()).collect();
                if let Ok(img_data) = base64::engine::general_purpose::STANDARD.decode(&clean) {
                    let mime = guess_image_mime(&img_data);
                    return Some((img_data, mime));
                }
            }
            return None;
        }

        search_pos = tag_end + 1;
    }
    None
}

/// Extract an attribute value from an XML tag string like
/// `<binary id="foo" content-type="bar">`.
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let pattern = format!("{}=\"", attr_name);
    let start = tag.find(&pattern)? + pattern.len();
    let end = tag[start..].find('"')? + start;
    Some(&tag[start..end])
}

/// Handle attributes on an opening/empty tag.
fn handle_open_tag(
    local: &str,
    e: &quick_xml::events::BytesStart<'_>,
    decoder: quick_xml::encoding::Decoder,
    path: &[String],
    meta: &mut ParsedBook,
) {
    // <sequence name="..." number="..."/> — a book may carry several
    if local == "sequence"
        && matches_path_with(path, local, &["description", "title-info", "sequence"])
    {
        let mut name = String::new();
        let mut number: i64 = 0;
        for attr in e.attributes().flatten() {
            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
            let val = attr.decode_and_unescape_value(decoder).unwrap_or_default();
            match key {
                "name" => name = strip_meta(&val),
                "number" => {
                    number = strip_meta(&val).parse::<i64>().unwrap_or(0).max(0);
                }
                _ => {}
            }
        }
        if !name.is_empty() {
            meta.sequences.push((name, number));
        }
    }

    // <image l:href="#cover.jpg"/> inside <coverpage>
    if local == "image"
        && (path_contains(path, "coverpage")
            || path.last().map(|s| s.as_str()) == Some("coverpage"))
    {
        for attr in e.attributes().flatten() {
            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
            if key.ends_with("href") {
                let val = attr.decode_and_unescape_value(decoder).unwrap_or_default();
                if !val.trim_start_matches('#').is_empty() {
                    meta.has_cover = true;
                }
            }
        }
    }
}

/// Get the local name of an XML tag, stripping any namespace prefix.
fn local_name(raw: &[u8]) -> String {
    let s = std::str::from_utf8(raw).unwrap_or("");
    match s.rfind(':') {
        Some(i) => s[i + 1..].to_lowercase(),
        None => s.to_lowercase(),
    }
}

/// Check whether the tag path ends with the given suffix sequence.
fn matches_path(path: &[String], suffix: &[&str]) -> bool {
    if path.len() < suffix.len() {
        return false;
    }
    let start = path.len() - suffix.len();
    path[start..].iter().zip(suffix.iter()).all(|(a, b)| a == b)
}

/// Check path match including a tag that hasn't been pushed yet.
fn matches_path_with(path: &[String], current_tag: &str, suffix: &[&str]) -> bool {
    if suffix.is_empty() {
        return false;
    }
    if suffix.last() != Some(&current_tag) {
        return false;
    }
    let parent_suffix = &suffix[..suffix.len() - 1];
    if parent_suffix.is_empty() {
        return true;
    }
    matches_path(path, parent_suffix)
}

fn path_contains(path: &[String], tag: &str) -> bool {
    path.iter().any(|s| s == tag)
}

/// Guess MIME type from image magic bytes.
fn guess_image_mime(data: &[u8]) -> String {
    if data.starts_with(b"\x89PNG") {
        "image/png".to_string()
    } else if data.starts_with(b"\xFF\xD8\xFF") {
        "image/jpeg".to_string()
    } else if data.starts_with(b"GIF8") {
        "image/gif".to_string()
    } else {
        "image/jpeg".to_string()
    }
}
