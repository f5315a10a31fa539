//! In-memory HTML page with regions addressable by element `id`.
//!
//! The page is kept as source text. Each lookup parses the current text with
//! `tl` and maps the matching element back to a byte range of the source, so
//! replacements splice the new content in without re-serializing the rest of
//! the document.
//!
//! `tl` does not apply HTML's implied end tags, so elements whose end tag is
//! optional (`<li>a<li>b`, `<p>one<p>two`) are located by a small tag scanner
//! instead.

use std::ops::Range;

use thiserror::Error;

/// Elements that can never have content.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Elements whose end tag may be left out.
const OPTIONAL_END: &[&str] = &[
    "li", "dt", "dd", "p", "option", "optgroup", "rt", "rp", "tr", "td", "th", "thead", "tbody",
];

/// Start tags that close an open `<p>`.
const P_CLOSERS: &[&str] = &[
    "address", "article", "aside", "blockquote", "details", "div", "dl", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hgroup", "hr", "main", "menu", "nav", "ol", "p", "pre", "section", "table", "ul",
];

/// Elements whose content is text up to their own end tag.
const RAW_TEXT: &[&str] = &["script", "style", "textarea", "title"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("page could not be parsed: {0}")]
    Parse(String),

    #[error("no element with id `{0}`")]
    RegionMissing(String),

    #[error("element `{id}` is a <{tag}> and cannot hold content")]
    NotContainer { id: String, tag: String },
}

/// An HTML document whose regions can be rewritten in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    source: String,
}

impl Page {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn into_string(self) -> String {
        self.source
    }

    /// `true` when an element with `id` exists.
    #[cfg(test)]
    pub fn has_region(&self, id: &str) -> bool {
        matches!(
            self.region_span(id),
            Ok(_) | Err(PageError::NotContainer { .. })
        )
    }

    /// Current inner content of the element with `id`.
    #[cfg(test)]
    pub fn region_html(&self, id: &str) -> Result<&str, PageError> {
        let span = self.region_span(id)?;
        Ok(&self.source[span])
    }

    /// Replace the inner content of the element with `id` by `html`.
    ///
    /// On error the page is left unchanged.
    pub fn replace_region(&mut self, id: &str, html: &str) -> Result<(), PageError> {
        let span = self.region_span(id)?;
        self.source.replace_range(span, html);
        Ok(())
    }

    /// Byte range of the inner content of the element with `id`.
    fn region_span(&self, id: &str) -> Result<Range<usize>, PageError> {
        match self.parsed_span(id)? {
            Some(span) => Ok(span),
            None => implied_span(&self.source, id),
        }
    }

    /// Range found through the `tl` DOM, or `None` when the element is
    /// absent from it, has an optional end tag, or is left unclosed.
    fn parsed_span(&self, id: &str) -> Result<Option<Range<usize>>, PageError> {
        let dom = tl::parse(&self.source, tl::ParserOptions::default().track_ids())
            .map_err(|e| PageError::Parse(format!("{e:?}")))?;
        let parser = dom.parser();
        let Some(tag) = dom
            .get_element_by_id(id)
            .and_then(|handle| handle.get(parser))
            .and_then(|node| node.as_tag())
        else {
            return Ok(None);
        };

        let name = tag.name().as_utf8_str().to_ascii_lowercase();
        if VOID_ELEMENTS.contains(&name.as_str()) {
            return Err(PageError::NotContainer {
                id: id.to_owned(),
                tag: name,
            });
        }
        if OPTIONAL_END.contains(&name.as_str()) {
            return Ok(None);
        }

        // `raw` borrows from `self.source`, so its offset is a pointer difference.
        let raw = tag.raw().as_bytes();
        let start = (raw.as_ptr() as usize)
            .checked_sub(self.source.as_ptr() as usize)
            .filter(|start| start + raw.len() <= self.source.len())
            .ok_or_else(|| PageError::Parse(format!("element `{id}` lies outside the source")))?;

        let span = opening_tag_len(raw)
            .zip(closing_tag_start(raw, &name))
            .filter(|(open_end, close_start)| open_end <= close_start)
            .map(|(open_end, close_start)| start + open_end..start + close_start);
        Ok(span)
    }
}

/// Locate the element with `id` by scanning tags, ending its content where a
/// browser would: at its own end tag, an ancestor's end tag, a start tag that
/// implies its end, or the end of the document.
fn implied_span(source: &str, id: &str) -> Result<Range<usize>, PageError> {
    let mut tags = Tags::new(source);
    let (name, open_end) = loop {
        match tags.next() {
            Some(Token::Start { name, start, end, .. })
                if attr_value(&source[start..end], "id") == Some(id) =>
            {
                break (name, end)
            }
            Some(_) => {}
            None => return Err(PageError::RegionMissing(id.to_owned())),
        }
    };
    if VOID_ELEMENTS.contains(&name.as_str()) {
        return Err(PageError::NotContainer {
            id: id.to_owned(),
            tag: name,
        });
    }

    let mut open: Vec<String> = Vec::new();
    for token in tags {
        match token {
            Token::Start {
                name: tag,
                start,
                self_closing,
                ..
            } => {
                while open.last().is_some_and(|top| implied_end(top, &tag)) {
                    open.pop();
                }
                if open.is_empty() && implied_end(&name, &tag) {
                    return Ok(open_end..start);
                }
                if !self_closing && !VOID_ELEMENTS.contains(&tag.as_str()) {
                    open.push(tag);
                }
            }
            Token::End { name: tag, start } => match open.iter().rposition(|o| *o == tag) {
                Some(i) => open.truncate(i),
                // Our own end tag or an ancestor's.
                None => return Ok(open_end..start),
            },
        }
    }
    Ok(open_end..source.len())
}

/// `true` when a `<next>` start tag ends an open `<open>` element.
fn implied_end(open: &str, next: &str) -> bool {
    match open {
        "li" => next == "li",
        "dt" | "dd" => matches!(next, "dt" | "dd"),
        "p" => P_CLOSERS.contains(&next),
        "option" => matches!(next, "option" | "optgroup"),
        "optgroup" => next == "optgroup",
        "rt" | "rp" => matches!(next, "rt" | "rp"),
        "tr" => matches!(next, "tr" | "tbody" | "thead" | "tfoot"),
        "td" | "th" => matches!(next, "td" | "th" | "tr" | "tbody" | "thead" | "tfoot"),
        "thead" | "tbody" => matches!(next, "tbody" | "tfoot"),
        _ => false,
    }
}

enum Token {
    Start {
        name: String,
        start: usize,
        end: usize,
        self_closing: bool,
    },
    End {
        name: String,
        start: usize,
    },
}

/// Start and end tags of an HTML source, skipping comments, doctypes and
/// raw-text content.
struct Tags<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tags<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }
}

impl Iterator for Tags<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let bytes = self.src.as_bytes();
        loop {
            let lt = self.pos + self.src.get(self.pos..)?.find('<')?;
            let rest = &self.src[lt..];
            if rest.starts_with("<!--") {
                self.pos = rest.find("-->").map_or(self.src.len(), |i| lt + i + 3);
                continue;
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                self.pos = rest.find('>').map_or(self.src.len(), |i| lt + i + 1);
                continue;
            }

            let closing = rest.starts_with("</");
            let name_at = if closing { lt + 2 } else { lt + 1 };
            let name_len = bytes[name_at..]
                .iter()
                .take_while(|b| b.is_ascii_alphanumeric() || **b == b'-')
                .count();
            if name_len == 0 || !bytes[name_at].is_ascii_alphabetic() {
                self.pos = lt + 1;
                continue;
            }
            let name = self.src[name_at..name_at + name_len].to_ascii_lowercase();
            let Some(len) = opening_tag_len(&bytes[lt..]) else {
                self.pos = self.src.len();
                return None;
            };
            let end = lt + len;
            self.pos = end;

            if closing {
                return Some(Token::End { name, start: lt });
            }
            let self_closing = self.src[lt..end - 1].ends_with('/');
            if RAW_TEXT.contains(&name.as_str()) && !self_closing {
                let close = self.src[end..]
                    .to_ascii_lowercase()
                    .find(&format!("</{name}"));
                self.pos = close.map_or(self.src.len(), |i| end + i);
            }
            return Some(Token::Start {
                name,
                start: lt,
                end,
                self_closing,
            });
        }
    }
}

/// Value of attribute `attr` in the opening tag `tag` (`<name ...>`).
fn attr_value<'a>(tag: &'a str, attr: &str) -> Option<&'a str> {
    let bytes = tag.as_bytes();
    let mut i = 1 + bytes[1..]
        .iter()
        .take_while(|b| !b.is_ascii_whitespace() && !matches!(**b, b'>' | b'/'))
        .count();
    loop {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'>' {
            return None;
        }
        let key_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        let key = &tag[key_start..i];
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = "";
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&q @ (b'"' | b'\'')) => {
                    let rest = &tag[i + 1..];
                    let len = rest.find(q as char)?;
                    value = &rest[..len];
                    i += len + 2;
                }
                _ => {
                    let start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = &tag[start..i];
                }
            }
        }
        if key.eq_ignore_ascii_case(attr) {
            return Some(value);
        }
    }
}

/// Length of the opening tag at the start of `raw`, including the `>`.
///
/// Quoted attribute values may contain `>`; those are skipped.
fn opening_tag_len(raw: &[u8]) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in raw.iter().enumerate() {
        match (quote, b) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i + 1),
            (None, _) => {}
        }
    }
    None
}

/// Offset of the trailing `</name>` in `raw`, if the element is closed.
fn closing_tag_start(raw: &[u8], name: &str) -> Option<usize> {
    let text = std::str::from_utf8(raw).ok()?;
    let trimmed = text.strip_suffix('>')?.trim_end();
    let start = trimmed.rfind("</")?;
    let closing = &trimmed[start + 2..];
    closing.eq_ignore_ascii_case(name).then_some(start)
}
