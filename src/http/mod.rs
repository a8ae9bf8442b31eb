//! HTTP value types shared by pages and fragments.
//!
//! This module provides the structured request/response values that cross
//! the engine's boundaries: [`Method`], [`Headers`], [`Cookie`]/[`CookieJar`],
//! [`PageRequest`], and [`PageResponse`]. There is no wire format here —
//! requests and responses reach the engine already parsed, through the
//! dispatch boundary in [`crate::client`].

use std::fmt;

pub mod cookies;
pub mod headers;
pub mod request;
pub mod response;

pub use cookies::{Cookie, CookieJar};
pub use headers::Headers;
pub use request::PageRequest;
pub use response::PageResponse;

/// An HTTP request method.
///
/// Fragment fetches are always [`Method::Get`]; the other variants exist
/// because the dispatch boundary forwards whatever method the embedding
/// framework saw on the page request.
///
/// # Examples
///
/// ```
/// use resi::http::Method;
///
/// let method: Method = "get".parse().unwrap();
/// assert!(method.is_get());
/// assert_eq!(method.as_str(), "GET");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// The only method fragment fetches use.
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    /// A non-standard extension method, stored as given.
    Custom(String),
}

// (canonical name, variant) for the standard methods.
const STANDARD: &[(&str, Method)] = &[
    ("GET", Method::Get),
    ("POST", Method::Post),
    ("PUT", Method::Put),
    ("DELETE", Method::Delete),
    ("HEAD", Method::Head),
    ("OPTIONS", Method::Options),
    ("PATCH", Method::Patch),
];

impl Method {
    /// Returns the canonical method name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Returns `true` for [`Method::Get`].
    pub fn is_get(&self) -> bool {
        *self == Self::Get
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    /// Standard method names parse case-insensitively; anything else
    /// becomes [`Method::Custom`] with its original casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Ok(STANDARD
            .iter()
            .find_map(|(name, method)| (*name == upper).then(|| method.clone()))
            .unwrap_or_else(|| Self::Custom(s.to_owned())))
    }
}
