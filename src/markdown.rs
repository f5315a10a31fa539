//! Markdown → HTML rendering.
//!
//! The loader only needs "raw text in, HTML text out", expressed by the
//! [`Renderer`] trait. Two implementations are provided:
//!
//! - [`ComrakRenderer`] (default): comrak with GFM extensions. Raw HTML in the
//!   source is omitted from the output.
//! - [`CommonMarkRenderer`]: pulldown-cmark with no extensions enabled. Raw
//!   HTML is passed through unchanged.
//!
//! Rendering is best-effort: malformed markdown still produces some output
//! and is never an error.

use clap::ValueEnum;
use comrak::{markdown_to_html, Options};
use serde::Deserialize;

/// Converts markdown source into an HTML fragment.
pub trait Renderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

/// Selects a [`Renderer`] from the CLI or the site configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    #[default]
    Comrak,
    Commonmark,
}

impl RendererKind {
    pub fn build(self) -> Box<dyn Renderer> {
        match self {
            RendererKind::Comrak => Box::new(ComrakRenderer),
            RendererKind::Commonmark => Box::new(CommonMarkRenderer),
        }
    }
}

/// comrak with strikethrough, tables, autolinks and task lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComrakRenderer;

/// Build comrak render options with GFM extensions and raw HTML suppressed.
fn make_options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    // Raw HTML from the source is replaced with `<!-- raw HTML omitted -->`.
    options.render.unsafe_ = false;
    options
}

impl Renderer for ComrakRenderer {
    fn render(&self, markdown: &str) -> String {
        markdown_to_html(markdown, &make_options())
    }
}

/// Strict CommonMark via pulldown-cmark.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonMarkRenderer;

impl Renderer for CommonMarkRenderer {
    fn render(&self, markdown: &str) -> String {
        let parser = pulldown_cmark::Parser::new_ext(markdown, pulldown_cmark::Options::empty());
        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        pulldown_cmark::html::push_html(&mut out, parser);
        out
    }
}

/// Minimal HTML entity escaping for text content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
