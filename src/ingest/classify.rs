//! Input classification
//!
//! Decides whether a request carries a raw body or a multipart form and checks
//! the metadata each kind needs before any byte is read.

use super::IngestError;
use crate::config::{RouteConfig, RouteMode};
use percent_encoding::percent_decode_str;

/// Media type of raw body uploads
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content kind of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    /// Whole body is the file; name came from a header
    RawBinary { declared_name: String },
    /// `multipart/form-data` body split on `boundary`
    Multipart { boundary: String },
}

/// Lowercased media type without parameters
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Classify an upload arriving on `route`
pub fn classify(
    route: &RouteConfig,
    content_type: Option<&str>,
    declared_name: Option<&str>,
) -> Result<ContentKind, IngestError> {
    let content_type = content_type.ok_or_else(|| {
        IngestError::UnsupportedMediaType("request has no Content-Type".into())
    })?;
    let media = media_type(content_type);

    match route.mode {
        RouteMode::Raw if media == OCTET_STREAM => {
            let declared_name = declared_name
                .map(decode_header_name)
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| {
                    IngestError::MissingMetadata(format!(
                        "header {} is required for raw uploads",
                        route.filename_header
                    ))
                })?;
            Ok(ContentKind::RawBinary { declared_name })
        }
        RouteMode::Single | RouteMode::Multiple if media.starts_with("multipart/") => {
            match multer::parse_boundary(content_type) {
                Ok(boundary) => Ok(ContentKind::Multipart { boundary }),
                Err(multer::Error::NoBoundary) => Err(IngestError::MissingMetadata(
                    "multipart Content-Type has no boundary".into(),
                )),
                Err(e) => Err(IngestError::UnsupportedMediaType(format!("{}: {}", media, e))),
            }
        }
        mode => Err(IngestError::UnsupportedMediaType(format!(
            "{} is not accepted by {} route {}",
            media,
            mode.as_str(),
            route.path
        ))),
    }
}

/// Header values may carry percent-encoded UTF-8 names
fn decode_header_name(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ErrorKind;

    fn kind_of(result: Result<ContentKind, IngestError>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    #[test]
    fn test_media_type_strips_parameters() {
        assert_eq!(
            media_type("Multipart/Form-Data; boundary=abc"),
            "multipart/form-data"
        );
        assert_eq!(media_type(" application/octet-stream "), OCTET_STREAM);
    }

    #[test]
    fn test_raw_with_name() {
        let route = RouteConfig::raw("/binaryUpload");
        let kind = classify(&route, Some("application/octet-stream"), Some("report.bin")).unwrap();
        assert_eq!(
            kind,
            ContentKind::RawBinary {
                declared_name: "report.bin".into()
            }
        );
    }

    #[test]
    fn test_raw_name_is_percent_decoded() {
        let route = RouteConfig::raw("/binaryUpload");
        let kind = classify(&route, Some(OCTET_STREAM), Some("r%C3%A9sum%C3%A9.pdf")).unwrap();
        assert_eq!(
            kind,
            ContentKind::RawBinary {
                declared_name: "résumé.pdf".into()
            }
        );
    }

    #[test]
    fn test_raw_without_name_is_missing_metadata() {
        let route = RouteConfig::raw("/binaryUpload");
        assert_eq!(
            kind_of(classify(&route, Some(OCTET_STREAM), None)),
            ErrorKind::MissingMetadata
        );
        assert_eq!(
            kind_of(classify(&route, Some(OCTET_STREAM), Some("  "))),
            ErrorKind::MissingMetadata
        );
    }

    #[test]
    fn test_multipart_boundary() {
        let route = RouteConfig::single("/upload", "file");
        let kind = classify(
            &route,
            Some("multipart/form-data; boundary=----abc123"),
            None,
        )
        .unwrap();
        assert_eq!(
            kind,
            ContentKind::Multipart {
                boundary: "----abc123".into()
            }
        );
    }

    #[test]
    fn test_multipart_without_boundary() {
        let route = RouteConfig::multiple("/multipleUpload", "files");
        assert_eq!(
            kind_of(classify(&route, Some("multipart/form-data"), None)),
            ErrorKind::MissingMetadata
        );
    }

    #[test]
    fn test_unsupported_media_types() {
        let raw = RouteConfig::raw("/binaryUpload");
        let single = RouteConfig::single("/upload", "file");

        assert_eq!(
            kind_of(classify(&raw, Some("text/plain"), Some("a.txt"))),
            ErrorKind::UnsupportedMediaType
        );
        assert_eq!(
            kind_of(classify(&raw, None, Some("a.txt"))),
            ErrorKind::UnsupportedMediaType
        );
        assert_eq!(
            kind_of(classify(
                &raw,
                Some("multipart/form-data; boundary=x"),
                Some("a.txt")
            )),
            ErrorKind::UnsupportedMediaType
        );
        assert_eq!(
            kind_of(classify(&single, Some(OCTET_STREAM), Some("a.txt"))),
            ErrorKind::UnsupportedMediaType
        );
    }
}
