//! Include-marker scanning and offset-tracking splicing.
//!
//! The only marker syntax is a self-closing tag of the form
//! `<esi:include src="URL" />`: case-insensitive tag and attribute name,
//! `URL` any non-empty run of non-`"` bytes, optional whitespace before
//! `/>`. Anything else that merely looks like an include tag is not
//! matched — the scanner is permissive and never fails on unmatched text.
//!
//! Splicing replaces each marker with fetched fragment content while
//! tracking the cumulative length drift earlier replacements introduce, so
//! later markers land at the right byte positions even when replacement
//! lengths differ from the marker text.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// Everything up to and including the opening quote of the src value.
const MARKER_PREFIX: &[u8] = b"<esi:include src=\"";

/// A single include reference found in a body.
///
/// Offsets are byte positions in the *original* (pre-splice) body:
/// `start` at the `<`, `end` one past the `>`. Within one scan pass the
/// markers are non-overlapping and strictly increasing by start offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeMarker {
    /// The literal `src` attribute value.
    pub src: String,
    /// Byte offset of the `<` in the scanned body.
    pub start: usize,
    /// Byte offset one past the closing `>`.
    pub end: usize,
}

impl IncludeMarker {
    /// Returns the `(start, end)` byte span of the marker text.
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// Returns the length of the marker text in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` for a zero-length span. Never produced by
    /// [`find_markers`]; exists for completeness of the span API.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Renders the marker text a scanner would find for `src`.
///
/// This is the integration point for template layers: emit this exact text
/// during rendering and [`find_markers`] will find it during composition.
pub fn marker_text(src: &str) -> String {
    format!("<esi:include src=\"{src}\" />")
}

/// Scans `body` for include markers, in increasing start-offset order.
///
/// Malformed include-like tags (unterminated src, missing `/>`, empty URL)
/// are skipped, not errors.
///
/// # Examples
///
/// ```
/// use resi::markers::find_markers;
///
/// let body = b"<p><esi:include src=\"/hello/7/\" /></p>";
/// let markers = find_markers(body);
/// assert_eq!(markers.len(), 1);
/// assert_eq!(markers[0].src, "/hello/7/");
/// assert_eq!(&body[markers[0].start..markers[0].end],
///            b"<esi:include src=\"/hello/7/\" />");
/// ```
pub fn find_markers(body: &[u8]) -> Vec<IncludeMarker> {
    let mut markers = Vec::new();
    let mut pos = 0;

    while pos < body.len() {
        let Some(offset) = body[pos..].iter().position(|&b| b == b'<') else {
            break;
        };
        let start = pos + offset;
        match parse_marker(&body[start..]) {
            Some((src, len)) => {
                markers.push(IncludeMarker {
                    src,
                    start,
                    end: start + len,
                });
                pos = start + len;
            }
            None => pos = start + 1,
        }
    }

    markers
}

// Tries to parse one marker at the head of `input` (which begins at a `<`).
// Returns the src value and the total marker length on success.
fn parse_marker(input: &[u8]) -> Option<(String, usize)> {
    if input.len() < MARKER_PREFIX.len()
        || !input[..MARKER_PREFIX.len()].eq_ignore_ascii_case(MARKER_PREFIX)
    {
        return None;
    }

    let src_start = MARKER_PREFIX.len();
    let mut i = src_start;
    while i < input.len() && input[i] != b'"' {
        i += 1;
    }
    if i == src_start || i >= input.len() {
        return None; // empty URL or unterminated quote
    }
    let src = std::str::from_utf8(&input[src_start..i]).ok()?.to_owned();
    i += 1;

    while i < input.len() && input[i].is_ascii_whitespace() {
        i += 1;
    }
    if input[i..].starts_with(b"/>") {
        Some((src, i + 2))
    } else {
        None
    }
}

/// Replaces each span of `body` with the corresponding replacement,
/// left to right, tracking cumulative drift.
///
/// Spans must be non-overlapping and in increasing start order, as
/// produced by [`find_markers`]. After replacing span `i`, every later
/// span shifts by the accumulated difference between replacement and
/// span lengths; replacement `i` is applied at
/// `start_i + cumulative_drift_before_i`.
///
/// With zero spans the body is returned unchanged.
pub fn splice<S>(body: &[u8], spans: S, replacements: &[Bytes]) -> Vec<u8>
where
    S: IntoIterator<Item = (usize, usize)>,
{
    let mut out = body.to_vec();
    let mut drift: isize = 0;

    for ((start, end), replacement) in spans.into_iter().zip(replacements) {
        let shifted_start = (start as isize + drift) as usize;
        let shifted_end = (end as isize + drift) as usize;
        out.splice(shifted_start..shifted_end, replacement.iter().copied());
        drift += replacement.len() as isize - (end - start) as isize;
    }

    out
}

/// Resolves a marker's `src` against the composing page's own path.
///
/// Absolute srcs (leading `/`) pass through unchanged. Relative srcs are
/// joined against the page path with standard URL-join semantics: the last
/// path segment of the base is dropped unless it ends in `/`, and `.`/`..`
/// segments are collapsed.
///
/// # Examples
///
/// ```
/// use resi::markers::resolve_src;
///
/// assert_eq!(resolve_src("/hello/", "/about/"), "/about/");
/// assert_eq!(resolve_src("/hello/", "./7/"), "/hello/7/");
/// assert_eq!(resolve_src("/a/b/page", "sidebar"), "/a/b/sidebar");
/// assert_eq!(resolve_src("/a/b/", "../c"), "/a/c");
/// ```
pub fn resolve_src(page_path: &str, src: &str) -> String {
    if src.starts_with('/') {
        return src.to_owned();
    }

    // Base directory: everything up to and including the last '/'.
    let base_end = page_path.rfind('/').map_or(0, |i| i + 1);
    let base = &page_path[..base_end];

    // Split keeps a leading "" for the root and a trailing "" for a
    // directory base; drop the trailing one so pushes land inside the base.
    let mut segments: Vec<&str> = base.split('/').collect();
    segments.pop();

    for segment in src.split('/') {
        match segment {
            "." => {}
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            s => segments.push(s),
        }
    }

    segments.join("/")
}
