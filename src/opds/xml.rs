use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

/// OPDS Atom content types.
pub const ATOM_XML: &str = "application/atom+xml;profile=opds-catalog";
pub const NAV_TYPE: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";
pub const ACQ_TYPE: &str = "application/atom+xml;profile=opds-catalog;kind=acquisition";
pub const OPENSEARCH_TYPE: &str = "application/opensearchdescription+xml";

/// OPDS link relations.
pub const REL_ACQUISITION: &str = "http://opds-spec.org/acquisition/open-access";
pub const REL_IMAGE: &str = "http://opds-spec.org/image";
pub const REL_THUMBNAIL: &str = "http://opds-spec.org/image/thumbnail";
pub const REL_STANZA_IMAGE: &str = "x-stanza-cover-image";
pub const REL_STANZA_THUMBNAIL: &str = "x-stanza-cover-image-thumbnail";

/// An OPDS Atom feed builder.
pub struct FeedBuilder {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl FeedBuilder {
    pub fn new() -> Self {
        let buf = Cursor::new(Vec::new());
        let writer = Writer::new_with_indent(buf, b' ', 2);
        Self { writer }
    }

    /// Write the XML declaration and open the `<feed>` element with the
    /// Atom, Dublin Core, OpenSearch and OPDS namespaces, then the fixed
    /// `self` and `start` links every feed carries.
    pub fn begin_feed(
        &mut self,
        id: &str,
        title: &str,
        subtitle: &str,
        updated: &str,
        self_href: &str,
        start_href: &str,
    ) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
        feed.push_attribute(("xmlns:dc", "http://purl.org/dc/terms/"));
        feed.push_attribute(("xmlns:os", "http://a9.com/-/spec/opensearch/1.1/"));
        feed.push_attribute(("xmlns:opds", "http://opds-spec.org/2010/catalog"));
        self.writer.write_event(Event::Start(feed))?;

        self.write_text_element("id", id)?;
        self.write_text_element("title", title)?;
        if !subtitle.is_empty() {
            self.write_text_element("subtitle", subtitle)?;
        }
        self.write_text_element("updated", updated)?;

        self.write_link(self_href, "self", NAV_TYPE, None)?;
        self.write_link(start_href, "start", NAV_TYPE, None)?;

        Ok(())
    }

    /// Write the OpenSearch description and search-template links.
    pub fn write_search_links(
        &mut self,
        description_href: &str,
        template_href: &str,
    ) -> Result<(), quick_xml::Error> {
        self.write_link(description_href, "opensearch", OPENSEARCH_TYPE, None)?;
        self.write_link(template_href, "search", "application/atom+xml", None)?;
        Ok(())
    }

    /// Write pagination links.
    pub fn write_pagination(
        &mut self,
        first_href: Option<&str>,
        prev_href: Option<&str>,
        next_href: Option<&str>,
    ) -> Result<(), quick_xml::Error> {
        if let Some(first) = first_href {
            self.write_link(first, "first", ACQ_TYPE, Some("First Page"))?;
        }
        if let Some(prev) = prev_href {
            self.write_link(prev, "previous", ACQ_TYPE, Some("Previous Page"))?;
        }
        if let Some(next) = next_href {
            self.write_link(next, "next", ACQ_TYPE, Some("Next Page"))?;
        }
        Ok(())
    }

    /// Write a navigation entry (catalog, author, genre, sequence link).
    pub fn write_nav_entry(
        &mut self,
        id: &str,
        title: &str,
        href: &str,
        content: &str,
        updated: &str,
    ) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Start(BytesStart::new("entry")))?;
        self.write_text_element("id", id)?;
        self.write_text_element("title", title)?;
        self.write_link(href, "subsection", NAV_TYPE, None)?;
        self.write_text_element("updated", updated)?;
        if !content.is_empty() {
            self.write_content_text(content)?;
        }
        self.writer
            .write_event(Event::End(BytesEnd::new("entry")))?;
        Ok(())
    }

    /// Begin a book acquisition entry.
    pub fn begin_entry(
        &mut self,
        id: &str,
        title: &str,
        updated: &str,
    ) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Start(BytesStart::new("entry")))?;
        self.write_text_element("id", id)?;
        self.write_text_element("title", title)?;
        self.write_text_element("updated", updated)?;
        Ok(())
    }

    /// Write an `<author>` with a uri pointing at its author page.
    pub fn write_author(&mut self, name: &str, uri: &str) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Start(BytesStart::new("author")))?;
        self.write_text_element("name", name)?;
        self.write_text_element("uri", uri)?;
        self.writer
            .write_event(Event::End(BytesEnd::new("author")))?;
        Ok(())
    }

    /// Write a `<category>` element.
    pub fn write_category(&mut self, term: &str, label: &str) -> Result<(), quick_xml::Error> {
        let mut el = BytesStart::new("category");
        el.push_attribute(("term", term));
        el.push_attribute(("label", label));
        self.writer.write_event(Event::Empty(el))?;
        Ok(())
    }

    /// Write a Dublin Core element, e.g. `<dc:language>`.
    pub fn write_dc(&mut self, element: &str, text: &str) -> Result<(), quick_xml::Error> {
        self.write_text_element(&format!("dc:{element}"), text)
    }

    /// Write plain text content.
    pub fn write_content_text(&mut self, text: &str) -> Result<(), quick_xml::Error> {
        let mut el = BytesStart::new("content");
        el.push_attribute(("type", "text"));
        self.writer.write_event(Event::Start(el))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer
            .write_event(Event::End(BytesEnd::new("content")))?;
        Ok(())
    }

    /// Write the four cover/thumbnail links for a book.
    pub fn write_cover_links(&mut self, prefix: &str, book_id: &str) -> Result<(), quick_xml::Error> {
        let cover = format!("{prefix}/cover/{book_id}.jpeg");
        let thumb = format!("{prefix}/thumbnail/{book_id}.jpeg");
        self.write_link(&cover, REL_IMAGE, "image/jpeg", None)?;
        self.write_link(&cover, REL_STANZA_IMAGE, "image/jpeg", None)?;
        self.write_link(&thumb, REL_THUMBNAIL, "image/jpeg", None)?;
        self.write_link(&thumb, REL_STANZA_THUMBNAIL, "image/jpeg", None)?;
        Ok(())
    }

    /// Write an open-access acquisition link.
    pub fn write_acquisition_link(
        &mut self,
        href: &str,
        mime: &str,
    ) -> Result<(), quick_xml::Error> {
        self.write_link(href, REL_ACQUISITION, mime, None)
    }

    /// Write a `related` link (the book's authors and series).
    pub fn write_related_link(
        &mut self,
        href: &str,
        title: &str,
    ) -> Result<(), quick_xml::Error> {
        self.write_link(href, "related", NAV_TYPE, Some(title))
    }

    /// End the current `<entry>`.
    pub fn end_entry(&mut self) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::End(BytesEnd::new("entry")))?;
        Ok(())
    }

    /// Close the `</feed>` and return the complete XML as bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, quick_xml::Error> {
        self.writer.write_event(Event::End(BytesEnd::new("feed")))?;
        Ok(self.writer.into_inner().into_inner())
    }

    /// Write a `<link>` element.
    pub fn write_link(
        &mut self,
        href: &str,
        rel: &str,
        link_type: &str,
        title: Option<&str>,
    ) -> Result<(), quick_xml::Error> {
        let mut el = BytesStart::new("link");
        el.push_attribute(("href", href));
        el.push_attribute(("rel", rel));
        el.push_attribute(("type", link_type));
        if let Some(t) = title {
            el.push_attribute(("title", t));
        }
        self.writer.write_event(Event::Empty(el))?;
        Ok(())
    }

    /// Write an arbitrary text element, e.g. `<format>` or `<size>`.
    pub fn write_text_element(&mut self, tag: &str, text: &str) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Start(BytesStart::new(tag)))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer.write_event(Event::End(BytesEnd::new(tag)))?;
        Ok(())
    }
}

impl Default for FeedBuilder {
    fn default() -> Self {
        Self::new()
    }
}
