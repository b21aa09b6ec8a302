use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::AppError;
use crate::result::Result;
use crate::stream::registry::{Registry, Session};

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// A file inside a session's output directory, ready to be served.
#[derive(Debug)]
pub struct HlsFile {
    pub path: PathBuf,
    pub content_type: String,
}

impl HlsFile {
    pub fn is_playlist(&self) -> bool {
        self.content_type == PLAYLIST_CONTENT_TYPE
    }
}

/// Splits `<token>/<relative-file-path>` on the first separator. An empty
/// file path is left to `resolve_within`, which reports it as not found.
pub fn split_path(path: &str) -> Result<(&str, &str)> {
    match path.split_once('/') {
        Some((token, rest)) if !token.is_empty() => Ok((token, rest)),
        _ => Err(AppError::invalid_request("Invalid path")),
    }
}

/// Joins `rest` onto `root`, refusing anything that would leave `root`.
pub fn resolve_within(root: &Path, rest: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(rest).components() {
        match component {
            Component::Normal(name) => {
                resolved.push(name);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                resolved.pop();
                depth -= 1;
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::forbidden("Path escapes stream directory"));
            }
        }
    }

    if depth == 0 {
        return Err(AppError::not_found("File not found"));
    }
    Ok(resolved)
}

pub fn content_type(path: &Path) -> String {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") => PLAYLIST_CONTENT_TYPE.to_string(),
        Some("ts") => SEGMENT_CONTENT_TYPE.to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Maps an inbound `<token>/<file>` path to the owning session and the file on disk.
pub async fn resolve(registry: &Registry, path: &str) -> Result<(Arc<Session>, HlsFile)> {
    let (token, rest) = split_path(path)?;
    let session = registry
        .lookup_by_token(token)
        .await
        .ok_or_else(|| AppError::not_found("Stream not found"))?;
    let path = resolve_within(&session.output_dir, rest)?;
    let file = HlsFile {
        content_type: content_type(&path),
        path,
    };
    Ok((session, file))
}

/// Opens a resolved file. Files the transcoder has not written yet, or has
/// already rotated out, are reported as not found.
pub async fn open(file: &HlsFile) -> Result<tokio::fs::File> {
    let metadata = tokio::fs::metadata(&file.path).await.map_err(io_error)?;
    if !metadata.is_file() {
        return Err(AppError::not_found("File not found"));
    }
    tokio::fs::File::open(&file.path).await.map_err(io_error)
}

fn io_error(e: std::io::Error) -> AppError {
    match e.kind() {
        ErrorKind::NotFound => AppError::not_found("File not found"),
        ErrorKind::InvalidInput => AppError::invalid_request("Invalid path"),
        _ => AppError::InternalServerError(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::registry::tests::{stream_config, MockTranscoder};

    #[test]
    fn test_split_path() {
        assert_eq!(("abc", "stream.m3u8"), split_path("abc/stream.m3u8").unwrap());
        assert_eq!(("abc", "sub/seg0.ts"), split_path("abc/sub/seg0.ts").unwrap());
        assert_eq!(("abc", ""), split_path("abc/").unwrap());
        for bad in ["abc", "", "/stream.m3u8"] {
            assert!(
                matches!(split_path(bad), Err(AppError::InvalidRequest(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_resolve_within() {
        let root = Path::new("/srv/hls/abc");
        assert_eq!(
            root.join("stream.m3u8"),
            resolve_within(root, "stream.m3u8").unwrap()
        );
        assert_eq!(
            root.join("stream0.ts"),
            resolve_within(root, "./x/../stream0.ts").unwrap()
        );
        assert!(matches!(
            resolve_within(root, "x/.."),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_within_rejects_escape() {
        let root = Path::new("/srv/hls/abc");
        for bad in [
            "../stream.m3u8",
            "../../etc/passwd",
            "x/../../other/stream.m3u8",
            "./../abc/stream.m3u8",
            "/etc/passwd",
            "a/b/../../../c",
        ] {
            assert!(
                matches!(resolve_within(root, bad), Err(AppError::Forbidden(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_content_type() {
        assert_eq!(
            PLAYLIST_CONTENT_TYPE,
            content_type(Path::new("stream.m3u8"))
        );
        assert_eq!(SEGMENT_CONTENT_TYPE, content_type(Path::new("stream12.ts")));
        assert_eq!("image/png", content_type(Path::new("thumb.png")));
        assert_eq!(
            "application/octet-stream",
            content_type(Path::new("stream"))
        );
    }

    #[tokio::test]
    async fn test_resolve_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(
            stream_config(&dir),
            Arc::new(MockTranscoder::default()),
        );

        let (url, _) = registry.get_or_create("rtsp://cam1").await.unwrap();
        let token = url
            .split('/')
            .rev()
            .nth(1)
            .unwrap()
            .to_string();

        let (session, file) = resolve(&registry, &format!("{token}/stream.m3u8"))
            .await
            .unwrap();
        assert_eq!(session.output_dir.join("stream.m3u8"), file.path);
        assert!(file.is_playlist());

        // not written by the transcoder yet
        assert!(matches!(open(&file).await, Err(AppError::NotFound(_))));

        std::fs::write(&file.path, "#EXTM3U\n").unwrap();
        assert!(open(&file).await.is_ok());

        assert!(matches!(
            resolve(&registry, "unknown/stream.m3u8").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            resolve(&registry, &format!("{token}/../{token}/stream.m3u8")).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            resolve(&registry, &token).await,
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            resolve(&registry, &format!("{token}/")).await,
            Err(AppError::NotFound(_))
        ));
    }
}
