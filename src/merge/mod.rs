//! Merge algebra for cross-fragment HTTP metadata.
//!
//! Fragments are full responses, but only a bounded set of their headers
//! may influence the composed page: `Vary` (union of tokens) and
//! `Last-Modified` (latest date). Every other fragment header is dropped.
//! The set is a closed table by design — extend [`MERGEABLE_HEADERS`] in a
//! fork if you need more headers, it is deliberately not runtime-pluggable.
//!
//! Cookies merge by fold: fragment jars in marker-encounter order, then
//! the page response's own jar last, so the page always wins when it sets
//! a cookie a fragment also set.

use std::collections::HashSet;

use crate::http::{CookieJar, Headers, PageResponse};

/// A merge function for one mergeable header: folds the accumulated
/// fragment values into the response's header map.
pub type MergeFn = fn(&mut PageResponse, Vec<String>);

/// The closed table of headers that participate in fragment merging.
pub const MERGEABLE_HEADERS: &[(&str, MergeFn)] = &[
    ("Vary", merge_vary),
    ("Last-Modified", merge_last_modified),
];

/// Returns `true` if `name` is one of the mergeable headers.
pub fn is_mergeable(name: &str) -> bool {
    MERGEABLE_HEADERS
        .iter()
        .any(|(header, _)| header.eq_ignore_ascii_case(name))
}

/// Copies a fragment's mergeable headers into `accumulator`, preserving
/// encounter order across fragments. Non-mergeable fragment headers are
/// ignored here, which is what drops them from the composed page.
pub fn collect_mergeable(accumulator: &mut Headers, fragment: &PageResponse) {
    for (name, _) in MERGEABLE_HEADERS {
        for value in fragment.headers().get_all(name) {
            accumulator.append(*name, value);
        }
    }
}

/// Applies every mergeable header's merge function against `response`,
/// using the values accumulated from fragments.
pub fn merge_fragment_headers(response: &mut PageResponse, accumulated: &Headers) {
    for (name, merge) in MERGEABLE_HEADERS {
        let values: Vec<String> = accumulated.get_all(name).map(str::to_owned).collect();
        if values.is_empty() {
            continue;
        }
        merge(response, values);
    }
}

/// Merges fragment cookie jars into the response.
///
/// Starts from the first fragment's jar, folds in subsequent fragments'
/// jars, then folds in the response's own jar last — identical cookie
/// identities set by the page response always win. Cookies with distinct
/// `(name, path, domain)` all survive independently.
pub fn merge_fragment_cookies(response: &mut PageResponse, fragment_jars: Vec<CookieJar>) {
    let mut jars = fragment_jars.into_iter();
    let Some(mut merged) = jars.next() else {
        return;
    };
    for jar in jars {
        merged.extend(jar);
    }
    merged.extend(response.cookies().clone());
    *response.cookies_mut() = merged;
}

// Vary: union of comma-separated tokens, de-duplicated case-insensitively,
// first-seen order, with the response's own tokens first.
fn merge_vary(response: &mut PageResponse, additional: Vec<String>) {
    let mut values = Vec::with_capacity(additional.len() + 1);
    if let Some(own) = response.headers().get("Vary") {
        values.push(own.to_owned());
    }
    values.extend(additional);

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for value in &values {
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if seen.insert(token.to_ascii_lowercase()) {
                merged.push(token.to_owned());
            }
        }
    }

    response.headers_mut().set("Vary", merged.join(", "));
}

// Last-Modified: the latest of all candidate dates. A single unparseable
// date abandons the merge for this response — the header is left as it
// was, the page still composes.
fn merge_last_modified(response: &mut PageResponse, additional: Vec<String>) {
    let mut dates = additional;
    if let Some(own) = response.headers().get("Last-Modified") {
        dates.push(own.to_owned());
    }

    let mut parsed = Vec::with_capacity(dates.len());
    for date in &dates {
        match httpdate::parse_http_date(date) {
            Ok(timestamp) => parsed.push(timestamp),
            Err(_) => {
                tracing::warn!(value = %date, "unparseable Last-Modified, skipping merge");
                return;
            }
        }
    }

    if let Some(latest) = parsed.into_iter().max() {
        response
            .headers_mut()
            .set("Last-Modified", httpdate::fmt_http_date(latest));
    }
}
