//! Turns markup lifted out of the sandbox into a standalone SVG 1.1 document and
//! writes it to disk.

use crate::ChartError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#;
pub const SVG_DOCTYPE: &str = r#"<!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd">"#;
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

// Declared on the new root; dropped from the carried-over attributes.
const ROOT_OWNED_ATTRIBUTES: [&str; 3] = ["xmlns", "xmlns:xlink", "version"];

// The only named entities XML defines without a DTD.
const XML_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];

// HTML named entities a browser serializer can emit, as code points.
const HTML_ENTITIES: [(&str, u32); 16] = [
    ("nbsp", 0xA0),
    ("shy", 0xAD),
    ("copy", 0xA9),
    ("reg", 0xAE),
    ("deg", 0xB0),
    ("middot", 0xB7),
    ("times", 0xD7),
    ("ndash", 0x2013),
    ("mdash", 0x2014),
    ("lsquo", 0x2018),
    ("rsquo", 0x2019),
    ("ldquo", 0x201C),
    ("rdquo", 0x201D),
    ("hellip", 0x2026),
    ("euro", 0x20AC),
    ("trade", 0x2122),
];

static ATTRIBUTE_PATTERN: OnceLock<Regex> = OnceLock::new();
static NAMED_ENTITY_PATTERN: OnceLock<Regex> = OnceLock::new();

fn attribute_pattern() -> &'static Regex {
    ATTRIBUTE_PATTERN.get_or_init(|| {
        Regex::new(r#"([^\s=/>"']+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("attribute pattern should compile")
    })
}

fn named_entity_pattern() -> &'static Regex {
    NAMED_ENTITY_PATTERN.get_or_init(|| {
        Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").expect("entity pattern should compile")
    })
}

/// A finished vector document and where it goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub document: String,
}

impl Artifact {
    pub fn from_markup(path: impl Into<PathBuf>, markup: &str) -> Self {
        Self {
            path: path.into(),
            document: normalize_svg(markup),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.document.len()
    }

    /// Writes the document through a temporary file in the destination directory,
    /// then renames it over `path`. The directory must already exist.
    pub fn persist(&self) -> Result<(), ChartError> {
        write_atomically(&self.path, self.document.as_bytes())
    }
}

/// Rewraps `markup` in a fresh `<svg>` root carrying the XML declaration, the SVG 1.1
/// DOCTYPE and both namespace declarations.
///
/// An existing XML declaration/DOCTYPE and the outermost `<svg>` element are
/// stripped first; the root's other attributes (`width`, `height`, `viewBox`, ...)
/// move to the new root. Named entities XML does not predefine become numeric
/// character references. Applying it twice yields the same document.
pub fn normalize_svg(markup: &str) -> String {
    let markup = xml_entities_only(markup);
    let body = strip_prolog(markup.trim());
    let (attributes, inner) = split_root(body);

    let mut document = String::with_capacity(markup.len() + 256);
    document.push_str(XML_DECLARATION);
    document.push('\n');
    document.push_str(SVG_DOCTYPE);
    document.push('\n');
    document.push_str(&format!(
        "<svg xmlns=\"{SVG_NAMESPACE}\" xmlns:xlink=\"{XLINK_NAMESPACE}\" version=\"1.1\""
    ));
    for (name, value) in attributes {
        document.push_str(&format!(" {name}=\"{}\"", value.replace('"', "&quot;")));
    }
    document.push_str(">\n");
    let inner = inner.trim();
    if !inner.is_empty() {
        document.push_str(inner);
        document.push('\n');
    }
    document.push_str("</svg>\n");
    document
}

/// Rewrites HTML-only named entities such as `&nbsp;` as numeric references. An
/// unrecognized name keeps its text with the ampersand escaped.
fn xml_entities_only(markup: &str) -> std::borrow::Cow<'_, str> {
    named_entity_pattern().replace_all(markup, |captures: &regex::Captures<'_>| {
        let name = &captures[1];
        if XML_ENTITIES.contains(&name) {
            return captures[0].to_string();
        }
        match HTML_ENTITIES.iter().find(|(entity, _)| *entity == name) {
            Some((_, code_point)) => format!("&#{code_point};"),
            None => format!("&amp;{name};"),
        }
    })
}

fn strip_prolog(mut body: &str) -> &str {
    loop {
        if body.starts_with("<?xml") {
            match body.find("?>") {
                Some(end) => body = body[end + 2..].trim_start(),
                None => return body,
            }
        } else if body.len() >= 9 && body[..9].eq_ignore_ascii_case("<!DOCTYPE") {
            match body.find('>') {
                Some(end) => body = body[end + 1..].trim_start(),
                None => return body,
            }
        } else {
            return body;
        }
    }
}

fn split_root(body: &str) -> (Vec<(String, String)>, &str) {
    if !is_svg_open_tag(body) {
        return (Vec::new(), body);
    }
    let Some(tag_end) = find_tag_end(body) else {
        return (Vec::new(), body);
    };
    let open_tag = &body[..tag_end];
    let attributes = root_attributes(open_tag);
    if open_tag.ends_with("/>") {
        return (attributes, &body[tag_end..]);
    }
    let rest = body[tag_end..].trim_end();
    let inner = rest.strip_suffix("</svg>").unwrap_or(rest);
    (attributes, inner)
}

fn is_svg_open_tag(body: &str) -> bool {
    let Some(rest) = body.strip_prefix("<svg") else {
        return false;
    };
    matches!(
        rest.chars().next(),
        Some(ch) if ch.is_whitespace() || ch == '>' || ch == '/'
    )
}

/// Byte index just past the `>` closing the tag at the start of `body`, skipping
/// over quoted attribute values.
fn find_tag_end(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (index, ch) in body.char_indices() {
        match (quote, ch) {
            (Some(open), ch) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '>') => return Some(index + 1),
            (None, _) => {}
        }
    }
    None
}

fn root_attributes(open_tag: &str) -> Vec<(String, String)> {
    let tag = open_tag.trim_start_matches("<svg");
    attribute_pattern()
        .captures_iter(tag)
        .filter_map(|captures| {
            let name = captures.get(1)?.as_str();
            if ROOT_OWNED_ATTRIBUTES.contains(&name) {
                return None;
            }
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .map(|value| value.as_str())
                .unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ChartError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        return Err(ChartError::io(
            parent,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "destination directory does not exist",
            ),
        ));
    }

    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|error| ChartError::io(parent, error))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|error| ChartError::io(temp.path(), error))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(|error| ChartError::io(temp.path(), error))?;
    }
    temp.persist(path)
        .map_err(|error| ChartError::io(path, error.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BROWSER_MARKUP: &str = r#"<svg width="800" height="600" xmlns="http://www.w3.org/2000/svg" version="1.1"><g class="viz"><circle r="4"></circle><text>a &gt; b</text></g></svg>"#;

    #[test]
    fn normalize_svg_wraps_inner_content_with_declarations() {
        let document = normalize_svg(BROWSER_MARKUP);

        assert!(document.starts_with(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n<!DOCTYPE svg PUBLIC"
        ));
        assert_eq!(document.matches("<svg").count(), 1);
        assert_eq!(document.matches("</svg>").count(), 1);
        assert_eq!(document.matches("xmlns=\"http://www.w3.org/2000/svg\"").count(), 1);
        assert!(document.contains("xmlns:xlink=\"http://www.w3.org/1999/xlink\""));
        assert!(document.contains(
            "version=\"1.1\" width=\"800\" height=\"600\">\n<g class=\"viz\">"
        ));
        assert!(document.contains("<text>a &gt; b</text></g>\n</svg>\n"));
    }

    #[test]
    fn normalize_svg_is_idempotent() {
        let inner = r#"<g><rect width="10" height="10"></rect></g>"#;
        let once = normalize_svg(inner);
        assert_eq!(normalize_svg(&once), once);

        let from_browser = normalize_svg(BROWSER_MARKUP);
        assert_eq!(normalize_svg(&from_browser), from_browser);
    }

    #[test]
    fn normalize_svg_html_entities_expected_numeric_references() {
        let document =
            normalize_svg("<svg width=\"10\"><text>Total&nbsp;value&hellip; &amp; more</text></svg>");

        assert!(!document.contains("&nbsp;"));
        assert!(!document.contains("&hellip;"));
        assert!(document.contains("<text>Total&#160;value&#8230; &amp; more</text>"));
        assert_eq!(normalize_svg(&document), document);
    }

    #[test]
    fn normalize_svg_unknown_entity_expected_escaped_ampersand() {
        let document = normalize_svg(r#"<svg aria-label="a&zwsp;b"><text>&lt;&bogus;</text></svg>"#);

        assert!(document.contains("aria-label=\"a&amp;zwsp;b\""));
        assert!(document.contains("<text>&lt;&amp;bogus;</text>"));
    }

    #[test]
    fn normalize_svg_keeps_nested_svg_elements() {
        let markup = r#"<svg viewBox="0 0 10 10"><svg x="1"><circle/></svg><g/></svg>"#;
        let document = normalize_svg(markup);

        assert!(document.contains("viewBox=\"0 0 10 10\""));
        assert!(document.contains("<svg x=\"1\"><circle/></svg><g/>\n</svg>\n"));
    }

    #[test]
    fn normalize_svg_self_closing_root_and_quoted_gt() {
        let document = normalize_svg(r#"<svg data-note='a > b' width="5"/>"#);
        assert!(document.contains("data-note=\"a > b\" width=\"5\">\n</svg>\n"));
    }

    #[test]
    fn normalize_svg_does_not_treat_svg_prefixed_tags_as_root() {
        let document = normalize_svg("<svgfoo/>");
        assert!(document.contains(">\n<svgfoo/>\n</svg>"));
    }

    #[test]
    fn persist_overwrites_existing_file() {
        let temp = TempDir::new().expect("tempdir should create");
        let path = temp.path().join("chart.svg");
        std::fs::write(&path, "old").expect("seed file should write");

        let artifact = Artifact::from_markup(&path, BROWSER_MARKUP);
        artifact.persist().expect("persist should succeed");

        let written = std::fs::read_to_string(&path).expect("artifact should read");
        assert_eq!(written, artifact.document);
        assert_eq!(artifact.size_bytes(), written.len());
    }

    #[test]
    fn persist_missing_directory_expected_io_error_and_no_file() {
        let temp = TempDir::new().expect("tempdir should create");
        let path = temp.path().join("missing").join("chart.svg");

        let error = Artifact::from_markup(&path, BROWSER_MARKUP)
            .persist()
            .expect_err("missing directory should fail");

        assert!(matches!(error, ChartError::Io { .. }));
        assert!(!path.exists());
    }
}
