//! Serving stored audio back to the player.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{self, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(serve_upload, serve_default))]
pub struct FilesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files/{name}", get(serve_upload))
        // Legacy path still requested by the web player.
        .route("/upload/{name}", get(serve_upload))
        .route("/default.mp3", get(serve_default))
}

/// Stream a converted file from the upload directory.
///
/// Responses are never cached: under the fixed slot policy the same name is
/// reused for every conversion.
#[utoipa::path(
    get,
    path = "/files/{name}",
    tag = "files",
    params(("name" = String, Path, description = "File name returned by /convert")),
    responses(
        (status = 200, description = "MP3 stream", body = Vec<u8>, content_type = "audio/mpeg"),
        (status = 404, description = "No such file"),
    )
)]
pub async fn serve_upload(
    State(state): State<Arc<AppState>>,
    extract::Path(name): extract::Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    let path = resolve_in_dir(&state.config.upload_dir, &name)
        .await
        .ok_or_else(|| ServerError::NotFound(format!("file '{name}' not found")))?;

    let mut response = serve_audio(&path, req).await?;
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    Ok(response)
}

/// Stream the bundled default track.
#[utoipa::path(
    get,
    path = "/default.mp3",
    tag = "files",
    responses(
        (status = 200, description = "MP3 stream", body = Vec<u8>, content_type = "audio/mpeg"),
        (status = 404, description = "No default track installed"),
    )
)]
pub async fn serve_default(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, ServerError> {
    let path = &state.config.default_audio_path;
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ServerError::NotFound("default audio not found".into()));
    }
    serve_audio(path, req).await
}

/// Map `name` to a regular file directly inside `dir`.
///
/// Anything other than a single plain file name (separators, `..`, drive
/// prefixes) is refused, and so is a symlink that leads out of `dir`.
pub async fn resolve_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    if name.contains(['/', '\\']) {
        return None;
    }
    let mut components = Path::new(name).components();
    let file_name = match (components.next(), components.next()) {
        (Some(Component::Normal(file_name)), None) => file_name,
        _ => return None,
    };

    let root = tokio::fs::canonicalize(dir).await.ok()?;
    let candidate = tokio::fs::canonicalize(root.join(file_name)).await.ok()?;
    if !candidate.starts_with(&root) {
        debug!(name = %name, resolved = %candidate.display(), "refusing path outside upload dir");
        return None;
    }

    let meta = tokio::fs::metadata(&candidate).await.ok()?;
    meta.is_file().then_some(candidate)
}

/// Serve `path` (range requests included) as `audio/mpeg` with a permissive
/// CORS header.
async fn serve_audio(path: &Path, req: Request) -> Result<Response, ServerError> {
    let response = ServeFile::new(path)
        .oneshot(req)
        .await
        .map_err(|e| ServerError::Internal(format!("serving {}: {e}", path.display())))?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(ServerError::NotFound(format!(
            "{} not found",
            path.file_name().unwrap_or_default().to_string_lossy()
        )));
    }

    let mut response = response.map(Body::new);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    Ok(response)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn resolves_plain_names_only() {
        let root = tempfile::tempdir().unwrap();
        let upload = root.path().join("upload");
        std::fs::create_dir(&upload).unwrap();
        std::fs::write(upload.join("1.mp3"), b"audio").unwrap();
        std::fs::write(root.path().join("secret.mp3"), b"secret").unwrap();

        assert!(resolve_in_dir(&upload, "1.mp3").await.is_some());
        for name in ["", ".", "..", "../secret.mp3", "..\\secret.mp3", "sub/1.mp3", "/etc/passwd", "missing.mp3"] {
            assert!(resolve_in_dir(&upload, name).await.is_none(), "{name:?} resolved");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_dir_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let upload = root.path().join("upload");
        std::fs::create_dir(&upload).unwrap();
        std::fs::write(root.path().join("secret.mp3"), b"secret").unwrap();
        std::os::unix::fs::symlink(root.path().join("secret.mp3"), upload.join("link.mp3")).unwrap();

        assert!(resolve_in_dir(&upload, "link.mp3").await.is_none());
    }

    #[tokio::test]
    async fn directories_are_not_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("nested")).unwrap();
        assert!(resolve_in_dir(root.path(), "nested").await.is_none());
    }
}
