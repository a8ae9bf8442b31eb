//! Gzip wrapper around the splice step.
//!
//! A page response that was compressed before reaching the engine must be
//! decompressed so the marker scanner sees text, then recompressed after
//! splicing. Decompression failure is fatal for the response: silently
//! returning unspliced compressed content would corrupt the page.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

use crate::http::PageResponse;

/// Errors from the gzip wrapper.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("failed to decompress gzip response body: {0}")]
    Decode(#[source] std::io::Error),

    #[error("failed to recompress response body: {0}")]
    Encode(#[source] std::io::Error),
}

/// Returns `true` if the response declares a gzip `Content-Encoding`.
pub fn is_gzipped(response: &PageResponse) -> bool {
    response
        .headers()
        .get("content-encoding")
        .is_some_and(|encoding| encoding.eq_ignore_ascii_case("gzip"))
}

/// Decompresses the response body in place and drops the
/// `Content-Encoding` header.
///
/// # Errors
///
/// [`CompressionError::Decode`] if the body is not valid gzip data.
pub fn gunzip_response(response: &mut PageResponse) -> Result<(), CompressionError> {
    let mut decoder = GzDecoder::new(response.content().as_ref());
    let mut body = Vec::with_capacity(response.content().len() * 2);
    decoder
        .read_to_end(&mut body)
        .map_err(CompressionError::Decode)?;

    response.set_content(body);
    response.headers_mut().remove("Content-Encoding");
    Ok(())
}

/// Compresses the response body in place and sets `Content-Encoding: gzip`.
///
/// # Errors
///
/// [`CompressionError::Encode`] if the encoder fails, which for in-memory
/// buffers indicates an I/O layer bug rather than bad input.
pub fn gzip_response(response: &mut PageResponse) -> Result<(), CompressionError> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(response.content().len() / 2 + 16),
        Compression::default(),
    );
    encoder
        .write_all(response.content())
        .map_err(CompressionError::Encode)?;
    let body = encoder.finish().map_err(CompressionError::Encode)?;

    response.set_content(Bytes::from(body));
    response.headers_mut().set("Content-Encoding", "gzip");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_gzip_encoding() {
        let plain = PageResponse::ok().body("text");
        assert!(!is_gzipped(&plain));

        let gzipped = PageResponse::ok().header("Content-Encoding", "gzip");
        assert!(is_gzipped(&gzipped));

        let other = PageResponse::ok().header("Content-Encoding", "br");
        assert!(!is_gzipped(&other));
    }

    #[test]
    fn roundtrip_restores_body() {
        let original = "z".repeat(500);
        let mut response = PageResponse::ok().body(original.clone());

        gzip_response(&mut response).unwrap();
        assert!(is_gzipped(&response));
        assert_ne!(response.content(), original.as_bytes());

        gunzip_response(&mut response).unwrap();
        assert!(!is_gzipped(&response));
        assert_eq!(response.content(), original.as_bytes());
    }

    #[test]
    fn gunzip_of_garbage_is_an_error() {
        let mut response = PageResponse::ok()
            .header("Content-Encoding", "gzip")
            .body("definitely not gzip");
        let result = gunzip_response(&mut response);
        assert!(matches!(result, Err(CompressionError::Decode(_))));
    }
}
