//! HTTP header map with case-insensitive name lookup.
//!
//! Header order matters here beyond wire fidelity: the merge rules in
//! [`crate::merge`] are defined over first-seen token order, and the
//! per-fragment header accumulator relies on appends staying in fragment
//! encounter order. The map therefore never reorders entries.

use std::fmt;

// One header line. Name comparison is always ASCII case-insensitive.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: String,
}

impl Entry {
    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// A case-insensitive, order-preserving, multi-value HTTP header map
/// (RFC 9110 §5.3 semantics).
///
/// Doubles as the accumulator for per-fragment mergeable headers:
/// appending the same name once per fragment keeps the fragments'
/// encounter order for the merge step.
///
/// # Examples
///
/// ```
/// use resi::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("Vary", "Cookie");
/// headers.append("Vary", "Accept-Language");
///
/// assert_eq!(headers.get("vary"), Some("Cookie"));
/// let all: Vec<_> = headers.get_all("VARY").collect();
/// assert_eq!(all, vec!["Cookie", "Accept-Language"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header line, keeping any existing values for the name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Entry {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replaces every value for `name` with a single entry.
    ///
    /// The merge functions use this to rewrite `Vary` and `Last-Modified`
    /// after folding fragment values in.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.append(name, value);
    }

    /// Returns the first value for `name`, or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find_map(|e| e.is(name).then_some(e.value.as_str()))
    }

    /// Returns every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter_map(move |e| e.is(name).then_some(e.value.as_str()))
    }

    /// Drops every entry named `name`; returns how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is(name));
        before - self.entries.len()
    }

    /// Returns `true` if at least one entry is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.is(name))
    }

    /// Returns the number of header lines (not unique names).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|e| (e.name.as_str(), e.value.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for Entry { name, value } in &self.entries {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
