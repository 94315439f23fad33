//! Origin resolution.
//!
//! The transport reports each sender's origin as `scheme://host[:port]` with
//! the default port elided, or `"null"` for opaque origins. To authenticate
//! an embedded context we must predict that string from the locator the
//! embedded resource was loaded from, byte for byte.

use portico_types::{ANY_ORIGIN, OPAQUE_ORIGIN};
use url::Url;

/// Schemes whose documents get an opaque origin.
const OPAQUE_ORIGIN_SCHEMES: &[&str] = &["file:", "data:"];

/// Registered default port for a scheme, if it has one we elide.
pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Location of the local document: the fallback for relative locators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLocation {
    /// Scheme without the trailing colon (`"https"`).
    pub scheme: String,
    /// Host name.
    pub host: String,
    /// Explicit port, if any.
    pub port: Option<u16>,
}

impl DocumentLocation {
    /// Create a location.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into(),
            port,
        }
    }

    /// Parse an absolute URL into a location. Returns `None` for URLs with
    /// no host.
    pub fn parse(input: &str) -> Option<Self> {
        let url = Url::parse(input).ok()?;
        let host = url.host_str()?.to_string();
        Some(Self {
            scheme: url.scheme().to_string(),
            host,
            port: url.port(),
        })
    }

    /// Serialized origin of this location.
    pub fn origin(&self) -> String {
        serialize_origin(&self.scheme, &self.host, self.port)
    }
}

fn serialize_origin(scheme: &str, host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) if Some(port) != default_port(scheme) => format!("{scheme}://{host}:{port}"),
        _ => format!("{scheme}://{host}"),
    }
}

/// Derive the origin an embedded resource will report, from its locator.
///
/// `src` is `None` when the resource is inline content, which inherits the
/// embedding document's origin.
pub fn resolve_origin(src: Option<&str>, location: &DocumentLocation) -> String {
    let Some(src) = src.map(str::trim).filter(|s| !s.is_empty()) else {
        return location.origin();
    };

    let lowered = src.to_ascii_lowercase();
    if OPAQUE_ORIGIN_SCHEMES
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return OPAQUE_ORIGIN.to_string();
    }

    // Protocol-relative locators take the document's scheme.
    let absolute = if src.starts_with("//") {
        Url::parse(&format!("{}:{}", location.scheme, src))
    } else {
        Url::parse(src)
    };

    match absolute {
        Ok(url) => match url.host_str() {
            Some(host) => serialize_origin(url.scheme(), host, url.port()),
            None => location.origin(),
        },
        // Relative path: same origin as the document.
        Err(_) => location.origin(),
    }
}

/// Target origin to use when sending to a context we trust as `origin`.
///
/// Opaque-origin contexts can only be reached with the wildcard.
pub fn origin_for_sending(origin: &str) -> &str {
    if origin == OPAQUE_ORIGIN {
        ANY_ORIGIN
    } else {
        origin
    }
}

/// Whether a declared origin satisfies an expectation (`*` accepts anything).
pub fn origin_matches(expected: &str, declared: &str) -> bool {
    expected == ANY_ORIGIN || expected == declared
}
