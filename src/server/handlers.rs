//! Request handlers
//!
//! Maps HTTP requests onto ingestion calls and ingestion results onto
//! responses.

use crate::config::{Config, RouteConfig, RouteMode};
use crate::ingest::{
    BatchReport, ErrorKind, IngestError, IngestOutcome, Ingestor, StoredObject, UploadRequest,
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// State shared by every connection
pub(crate) struct AppState {
    pub(crate) config: Config,
    pub(crate) ingestor: Ingestor,
    permits: Option<Arc<Semaphore>>,
}

impl AppState {
    pub(crate) fn new(config: Config) -> Self {
        let ingestor = Ingestor::new(config.storage.clone());
        let permits = config
            .server
            .max_concurrent_uploads
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            config,
            ingestor,
            permits,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
}

impl From<&IngestError> for ErrorBody {
    fn from(e: &IngestError) -> Self {
        let message = match e.kind() {
            // Server-side failures may carry filesystem paths
            ErrorKind::IoError | ErrorKind::CommitFailed => "upload could not be stored".to_string(),
            _ => e.to_string(),
        };
        Self {
            error: e.kind(),
            message,
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchView<'a> {
    committed: usize,
    failed: usize,
    parts: Vec<PartView<'a>>,
}

#[derive(Debug, Serialize)]
struct PartView<'a> {
    index: usize,
    field: Option<&'a str>,
    declared_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    object: Option<&'a StoredObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl<'a> From<&'a BatchReport> for BatchView<'a> {
    fn from(report: &'a BatchReport) -> Self {
        let parts = report
            .parts
            .iter()
            .map(|part| PartView {
                index: part.index,
                field: part.field.as_deref(),
                declared_name: part.declared_name.as_deref(),
                object: part.result.as_ref().ok(),
                error: part.result.as_ref().err().map(ErrorBody::from),
            })
            .collect();
        Self {
            committed: report.committed().count(),
            failed: report.failed().count(),
            parts,
        }
    }
}

/// Route one request
pub(crate) async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<String>, Infallible>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    info!("Handling {} {}", method, path);

    if path == "/health" && method == Method::GET {
        return Ok(text_response(StatusCode::OK, "text/plain", "ok".to_string()));
    }

    if path == "/" && method == Method::GET {
        return Ok(text_response(
            StatusCode::OK,
            "text/html; charset=utf-8",
            upload_form(&state.config.routes),
        ));
    }

    let Some(route) = state.config.route_for_path(&path) else {
        info!("No upload route configured for path: {}", path);
        return Ok(text_response(
            StatusCode::NOT_FOUND,
            "text/plain",
            "Not Found".to_string(),
        ));
    };

    if method != Method::POST {
        let mut response = text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            "Method Not Allowed".to_string(),
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return Ok(response);
    }

    let _permit = match &state.permits {
        Some(permits) => match Arc::clone(permits).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!("Upload rejected on {}: concurrency limit reached", path);
                return Ok(text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "text/plain",
                    "Too many uploads in progress".to_string(),
                ));
            }
        },
        None => None,
    };

    let request = build_upload_request(route, req);
    let response = match state.ingestor.ingest(route, request).await {
        Ok(IngestOutcome::Single(object)) => json_response(StatusCode::CREATED, &object),
        Ok(IngestOutcome::Batch(report)) => {
            let status = if report.is_partial() {
                StatusCode::MULTI_STATUS
            } else {
                StatusCode::CREATED
            };
            json_response(status, &BatchView::from(&report))
        }
        Err(e) => {
            let status = status_for(e.kind());
            if status.is_server_error() {
                error!("Upload to {} failed: {}", path, e);
            } else {
                warn!("Upload to {} rejected: {}", path, e);
            }
            json_response(status, &ErrorBody::from(&e))
        }
    };

    Ok(response)
}

/// Turn the HTTP request into the ingestion core's input
fn build_upload_request<B>(route: &RouteConfig, req: Request<B>) -> UploadRequest
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

    let declared_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());

    let declared_name = match route.mode {
        RouteMode::Raw => parts
            .headers
            .get(route.filename_header.as_str())
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned()),
        RouteMode::Single | RouteMode::Multiple => None,
    };

    let body = TryStreamExt::map_err(body.into_data_stream(), io::Error::other).boxed();

    UploadRequest {
        content_type,
        declared_name,
        declared_length,
        body,
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::MissingMetadata | ErrorKind::MissingPayload => StatusCode::BAD_REQUEST,
        ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::IoError | ErrorKind::CommitFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// HTML form posting to each multipart route
fn upload_form(routes: &[RouteConfig]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Local Uploadr</title></head>\n<body>\n",
    );

    for route in routes.iter().filter(|r| r.mode.is_multipart()) {
        let multiple = if route.mode == RouteMode::Multiple {
            " multiple"
        } else {
            ""
        };
        html.push_str(&format!(
            "<form action=\"{path}\" method=\"post\" enctype=\"multipart/form-data\">\n\
             <input type=\"file\" name=\"{field}\"{multiple}>\n\
             <input type=\"submit\" value=\"Upload to {path}\">\n\
             </form>\n",
            path = escape_html(&route.path),
            field = escape_html(&route.field),
            multiple = multiple,
        ));
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<String> {
    match serde_json::to_string(value) {
        Ok(body) => text_response(status, "application/json", body),
        Err(e) => {
            error!("Failed to encode response body: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "Internal Server Error".to_string(),
            )
        }
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
