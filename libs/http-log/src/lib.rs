use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use tracing::{error, info, trace, warn};

const SLOW_REQUEST: Duration = Duration::from_millis(500);

/// Logs every request with its status and latency.
///
/// JSON bodies are buffered and traced; anything else (playlists, media
/// segments) passes through untouched so file responses keep streaming.
pub async fn print_request_response(
    req: Request,
    next: Next,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let req = if is_json(req.headers()) {
        let (parts, body) = req.into_parts();
        let bytes = buffer_and_print("request", &parts.headers, body).await?;
        Request::from_parts(parts, Body::from(bytes))
    } else {
        req
    };

    let res = next.run(req).await;
    let res = if is_json(res.headers()) {
        let (parts, body) = res.into_parts();
        let bytes = buffer_and_print("response", &parts.headers, body).await?;
        Response::from_parts(parts, Body::from(bytes))
    } else {
        res
    };

    log_completion(&method, &uri, res.status(), start.elapsed());
    Ok(res)
}

fn log_completion(method: &Method, uri: &Uri, status: StatusCode, duration: Duration) {
    let ms = duration.as_millis();
    if status.is_server_error() {
        error!("[{} {}] [{}] {}ms", method, uri, status.as_u16(), ms);
    } else if status.is_client_error() || duration > SLOW_REQUEST {
        warn!("[{} {}] [{}] {}ms", method, uri, status.as_u16(), ms);
    } else {
        info!("[{} {}] [{}] {}ms", method, uri, status.as_u16(), ms);
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

async fn buffer_and_print<B>(
    direction: &str,
    headers: &HeaderMap,
    body: B,
) -> std::result::Result<Bytes, (StatusCode, String)>
where
    B: axum::body::HttpBody<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let bytes = body
        .collect()
        .await
        .map_err(|err| {
            (
                StatusCode::BAD_REQUEST,
                format!("failed to read {direction} body: {err}"),
            )
        })?
        .to_bytes();

    if let Ok(body) = std::str::from_utf8(&bytes) {
        trace!("{direction} headers = {headers:?} body = {body:?}");
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_is_json() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp2t"));
        assert!(!is_json(&headers));
    }
}
