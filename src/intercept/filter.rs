//! Content-type filtering for captured responses.
//!
//! Callers describe what they want with short human-readable tokens ("json",
//! "text/*", exact MIME strings) rather than regexes. The filter compiles the
//! tokens once; the `Any` token short-circuits everything, including extra
//! patterns.

use regex::{Regex, RegexBuilder};

/// Human-readable content-type tokens. Shortcut tokens cover the families a
/// MIME type belongs to; `Exact` matches one literal MIME string, allowing a
/// trailing `;charset=...` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeToken {
    /// Match everything. Extra patterns are ignored when this is present.
    Any,
    /// Any `text/...` type.
    TextAny,
    /// `text/plain`
    Plain,
    /// `text/html`
    Html,
    /// `text/css`
    Css,
    /// `text/csv`
    Csv,
    /// `application/json` and `application/*+json`
    Json,
    /// `application/x-ndjson`
    Ndjson,
    /// `application/xml`, `application/*+xml`, `text/xml`
    Xml,
    /// `application/javascript`, `text/javascript`, ecmascript variants
    Js,
    /// `application/x-www-form-urlencoded`
    Form,
    /// `text/event-stream`
    EventStream,
    /// One literal MIME string, optional parameters allowed after it.
    Exact(String),
}

impl ContentTypeToken {
    fn pattern(&self) -> Option<String> {
        let p = match self {
            ContentTypeToken::Any => return None,
            ContentTypeToken::TextAny => r"^text/".to_string(),
            ContentTypeToken::Plain => r"^text/plain(?:;|$)".to_string(),
            ContentTypeToken::Html => r"^text/html(?:;|$)".to_string(),
            ContentTypeToken::Css => r"^text/css(?:;|$)".to_string(),
            ContentTypeToken::Csv => r"^text/csv(?:;|$)".to_string(),
            ContentTypeToken::Json => {
                r"^(?:application/json|application/.+\+json)(?:;|$)".to_string()
            }
            ContentTypeToken::Ndjson => r"^application/x-ndjson(?:;|$)".to_string(),
            ContentTypeToken::Xml => {
                r"^(?:application/xml|application/.+\+xml|text/xml)(?:;|$)".to_string()
            }
            ContentTypeToken::Js => {
                r"^(?:application|text)/(?:javascript|ecmascript)(?:;|$)".to_string()
            }
            ContentTypeToken::Form => r"^application/x-www-form-urlencoded(?:;|$)".to_string(),
            ContentTypeToken::EventStream => r"^text/event-stream(?:;|$)".to_string(),
            ContentTypeToken::Exact(mime) => format!("^{}(?:;|$)", regex::escape(mime)),
        };
        Some(p)
    }
}

impl std::str::FromStr for ContentTypeToken {
    type Err = std::convert::Infallible;

    /// Parse a token spelled the way users write it on the command line.
    /// Anything unrecognized is treated as an exact MIME string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "any" => ContentTypeToken::Any,
            "text/*" => ContentTypeToken::TextAny,
            "plain" => ContentTypeToken::Plain,
            "html" => ContentTypeToken::Html,
            "css" => ContentTypeToken::Css,
            "csv" => ContentTypeToken::Csv,
            "json" => ContentTypeToken::Json,
            "ndjson" => ContentTypeToken::Ndjson,
            "xml" => ContentTypeToken::Xml,
            "js" => ContentTypeToken::Js,
            "form" => ContentTypeToken::Form,
            "event-stream" => ContentTypeToken::EventStream,
            other => ContentTypeToken::Exact(other.to_string()),
        })
    }
}

/// Compiled content-type matcher.
#[derive(Debug, Clone)]
pub struct ContentTypeFilter {
    allow_all: bool,
    rules: Vec<Regex>,
}

impl ContentTypeFilter {
    /// Compile a filter from tokens plus free-form extra regex patterns.
    ///
    /// When `Any` appears anywhere in `tokens`, the filter matches everything
    /// and the extras are ignored. An extra pattern that fails to compile is
    /// logged and skipped rather than failing the whole filter.
    pub fn new(tokens: &[ContentTypeToken], extra_patterns: &[String]) -> Self {
        if tokens.contains(&ContentTypeToken::Any) {
            return Self {
                allow_all: true,
                rules: Vec::new(),
            };
        }

        let mut rules = Vec::new();
        for token in tokens {
            if let Some(pattern) = token.pattern() {
                // token patterns are fixed strings, compilation cannot fail
                rules.push(case_insensitive(&pattern).unwrap());
            }
        }
        for pattern in extra_patterns {
            match case_insensitive(pattern) {
                Ok(re) => rules.push(re),
                Err(err) => {
                    tracing::warn!(pattern, "skipping invalid content-type pattern: {err}");
                }
            }
        }

        Self {
            allow_all: false,
            rules,
        }
    }

    /// Filter that accepts every content type.
    pub fn any() -> Self {
        Self::new(&[ContentTypeToken::Any], &[])
    }

    /// Whether a response with this `Content-Type` header should be captured.
    ///
    /// An absent header only passes the all-accepting filter.
    pub fn matches(&self, content_type: Option<&str>) -> bool {
        if self.allow_all {
            return true;
        }
        let Some(ct) = content_type else {
            return false;
        };
        self.rules.iter().any(|re| re.is_match(ct))
    }
}

impl Default for ContentTypeFilter {
    fn default() -> Self {
        Self::any()
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
