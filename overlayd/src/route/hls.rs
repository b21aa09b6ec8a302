use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio_util::io::ReaderStream;
use tracing::trace;

use crate::result::Result;
use crate::route::AppState;
use crate::stream::gateway;

pub fn route() -> Router<AppState> {
    Router::new().route("/hls/{*path}", get(serve_file))
}

async fn serve_file(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response> {
    let (session, file) = gateway::resolve(&state.registry, &path).await?;
    let handle = gateway::open(&file).await?;
    trace!("serving {} for stream {}", file.path.display(), session.source_url);

    let mut builder =
        http::Response::builder().header(header::CONTENT_TYPE, &file.content_type);
    if file.is_playlist() {
        builder = builder.header(header::CACHE_CONTROL, "no-cache");
    }
    Ok(builder.body(Body::from_stream(ReaderStream::new(handle)))?)
}
