//! Static allow-list validation of submitted markup.
//!
//! The validator decides accept/reject before anything reaches the renderer.
//! It is closed-world: an external fetch is only permitted when the target is
//! an embedded `data:image/` URI or starts with one of the configured
//! allow-list prefixes. Rules are evaluated in a fixed order and the first
//! violation decides the [`Rejection`].

use crate::stylesheet::{self, Stylesheet};
use crate::{Error, Result};
use log::debug;
use scraper::{ElementRef, Html};
use url::Url;

/// Prefix of embedded image URIs, which never cause a network fetch.
pub const DATA_IMAGE_PREFIX: &str = "data:image/";

/// Attributes that make the renderer fetch a resource (checked in strict mode).
const RESOURCE_ATTRIBUTES: &[&str] = &["src", "poster", "background", "data", "srcset"];

/// Elements whose `href` is fetched rather than navigated to.
const FETCHING_HREF_ELEMENTS: &[&str] = &["image", "use", "feimage"];

/// Why a document was refused.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("script elements are not allowed")]
    Script,

    #[error("external resource links are not allowed")]
    ExternalLink,

    #[error("frame and iframe elements are not allowed")]
    Frame,

    #[error("image source is not allowed: {0}")]
    ImageSource(String),

    #[error("inline stylesheet could not be parsed: {0}")]
    StylesheetParse(String),

    #[error("style references a disallowed external resource: {0}")]
    StyleResource(String),

    #[error("event handler attributes are not allowed: {0}")]
    EventHandler(String),

    #[error("embedded object elements are not allowed: <{0}>")]
    Embed(String),

    #[error("attribute references a disallowed external resource: {0}")]
    ResourceAttribute(String),

    #[error("style attribute references a disallowed external resource: {0}")]
    StyleAttribute(String),
}

/// The closed set of origin prefixes the renderer may fetch from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    prefixes: Vec<String>,
}

impl AllowList {
    /// Build an allow-list from absolute `http`/`https` URL prefixes.
    ///
    /// Prefixes are normalised the same way candidates are, so a bare origin
    /// such as `https://cdn.example.com` only matches that host.
    pub fn new<I, S>(prefixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalised = Vec::new();
        for prefix in prefixes {
            let raw = prefix.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            let url = Url::parse(raw).map_err(|e| {
                Error::ConfigError(format!("allow-list entry '{}' is not an absolute URL: {}", raw, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(Error::ConfigError(format!(
                    "allow-list entry '{}' must be an http(s) URL with a host",
                    raw
                )));
            }
            normalised.push(url.to_string());
        }
        Ok(Self { prefixes: normalised })
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Whether the renderer may fetch `candidate`.
    pub fn permits(&self, candidate: &str) -> bool {
        let candidate = candidate.trim_matches(|c: char| c.is_ascii_whitespace());
        if is_data_image(candidate) {
            return true;
        }
        match Url::parse(candidate) {
            Ok(url) => self.prefixes.iter().any(|p| url.as_str().starts_with(p.as_str())),
            Err(_) => false,
        }
    }
}

fn is_data_image(candidate: &str) -> bool {
    candidate
        .get(..DATA_IMAGE_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(DATA_IMAGE_PREFIX))
}

/// Markup validator.
///
/// # Examples
///
/// ```
/// use html2img::validator::{AllowList, Rejection, Validator};
///
/// let validator = Validator::new(AllowList::default());
/// assert_eq!(validator.validate("<b>hi</b>"), None);
/// assert_eq!(validator.validate("<script>x</script>"), Some(Rejection::Script));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Validator {
    allow_list: AllowList,
    strict: bool,
}

impl Validator {
    pub fn new(allow_list: AllowList) -> Self {
        Self {
            allow_list,
            strict: false,
        }
    }

    /// Also reject event handlers, embedded objects, resource attributes and
    /// `style="..."` references that the base rules do not inspect.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Returns the rejection reason, or `None` when the markup is accepted.
    pub fn validate(&self, markup: &str) -> Option<Rejection> {
        self.check(markup).err()
    }

    pub fn check(&self, markup: &str) -> std::result::Result<(), Rejection> {
        // html5ever recovers from every syntax error, so parsing itself never
        // rejects; the recovered tree is what the browser will build too.
        let document = Html::parse_fragment(markup);
        if !document.errors.is_empty() {
            debug!("markup parsed with {} recovered errors", document.errors.len());
        }

        self.check_elements(&document)?;
        self.check_inline_styles(&document)?;
        if self.strict {
            self.check_strict(&document)?;
        }
        Ok(())
    }

    fn check_elements(&self, document: &Html) -> std::result::Result<(), Rejection> {
        if has_element(document, &["script", "noscript"]) {
            return Err(Rejection::Script);
        }
        if has_element(document, &["link"]) {
            return Err(Rejection::ExternalLink);
        }
        if has_element(document, &["frame", "iframe"]) {
            return Err(Rejection::Frame);
        }
        for img in elements(document).filter(|e| is_named(e, "img")) {
            if let Some(src) = img.value().attr("src") {
                if !self.allow_list.permits(src) {
                    return Err(Rejection::ImageSource(src.trim().to_string()));
                }
            }
        }
        Ok(())
    }

    fn check_inline_styles(&self, document: &Html) -> std::result::Result<(), Rejection> {
        let css = elements(document)
            .filter(|e| is_named(e, "style"))
            .map(|e| e.text().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n");
        if css.trim().is_empty() {
            return Ok(());
        }
        let sheet = stylesheet::parse_stylesheet(&css)
            .map_err(|e| Rejection::StylesheetParse(e.to_string()))?;
        self.check_stylesheet(&sheet)
    }

    fn check_stylesheet(&self, sheet: &Stylesheet) -> std::result::Result<(), Rejection> {
        for rule in sheet.flatten() {
            // selectors never fetch, at-rule preludes may
            let prelude_urls: Vec<String> = match rule.at_keyword() {
                Some(_) => stylesheet::import_target(&rule.prelude)
                    .into_iter()
                    .chain(stylesheet::extract_urls(&rule.prelude))
                    .collect(),
                None => Vec::new(),
            };
            let value_urls = rule
                .declarations
                .iter()
                .flat_map(|d| stylesheet::extract_urls(&d.value));
            for url in prelude_urls.into_iter().chain(value_urls) {
                if !self.allow_list.permits(&url) {
                    return Err(Rejection::StyleResource(url));
                }
            }
        }
        Ok(())
    }

    fn check_strict(&self, document: &Html) -> std::result::Result<(), Rejection> {
        for element in elements(document) {
            let name = element.value().name().to_ascii_lowercase();
            if matches!(name.as_str(), "object" | "embed" | "applet" | "portal") {
                return Err(Rejection::Embed(name));
            }
            let attrs: Vec<(String, &str)> = element
                .value()
                .attrs()
                .map(|(attr, value)| (attr.to_ascii_lowercase(), value))
                .collect();
            if let Some((attr, _)) = attrs.iter().find(|(attr, _)| attr.starts_with("on")) {
                return Err(Rejection::EventHandler(attr.clone()));
            }
            for (attr, value) in &attrs {
                let fetched = RESOURCE_ATTRIBUTES.contains(&attr.as_str())
                    || (FETCHING_HREF_ELEMENTS.contains(&name.as_str()) && attr == "href");
                if !fetched {
                    continue;
                }
                let candidates = if attr == "srcset" {
                    srcset_urls(value)
                } else {
                    vec![value.to_string()]
                };
                if let Some(bad) = candidates.into_iter().find(|c| !self.allow_list.permits(c)) {
                    return Err(Rejection::ResourceAttribute(bad));
                }
            }
            if let Some((_, style)) = attrs.iter().find(|(attr, _)| attr == "style") {
                if let Some(bad) = stylesheet::extract_urls(style)
                    .into_iter()
                    .find(|u| !self.allow_list.permits(u))
                {
                    return Err(Rejection::StyleAttribute(bad));
                }
            }
        }
        Ok(())
    }
}

fn elements(document: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    document.tree.nodes().filter_map(ElementRef::wrap)
}

fn is_named(element: &ElementRef<'_>, name: &str) -> bool {
    element.value().name().eq_ignore_ascii_case(name)
}

fn has_element(document: &Html, names: &[&str]) -> bool {
    elements(document).any(|e| names.iter().any(|n| is_named(&e, n)))
}

/// URL candidates of a `srcset` value (descriptors dropped).
fn srcset_urls(srcset: &str) -> Vec<String> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
