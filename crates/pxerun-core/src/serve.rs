//! Allow-list HTTP file server for the kernel and initrd.
//!
//! Only two files are ever served. A request path is percent-decoded,
//! cleaned lexically as an absolute path, re-anchored at the working
//! directory and then compared byte-for-byte with the two pre-computed
//! paths. Anything else is a 404, whatever `..` or `//` it contains.

use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::boot::{INITRD_SUFFIX, KERNEL_SUFFIX};
use crate::error::CoreError;

/// Grace period given to in-flight transfers on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Parse a listen address; a bare `:port` listens on all interfaces.
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr, AddrParseError> {
    match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => raw.parse(),
    }
}

/// Lexically clean `path` as an absolute, slash-separated path.
///
/// Empty and `.` segments are dropped, `..` removes the previous segment
/// and never climbs above `/`. The result always starts with `/` and never
/// ends with one (except for the root itself).
pub fn clean_absolute(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

fn anchor(root: &Path, requested: &str) -> PathBuf {
    root.join(clean_absolute(requested).trim_start_matches('/'))
}

// ── ServeFiles ───────────────────────────────────────────────────────

/// The two files the server may return, as absolute paths.
#[derive(Debug, Clone)]
pub struct ServeFiles {
    root: PathBuf,
    files: [PathBuf; 2],
}

impl ServeFiles {
    /// Allow `<name>-kernel` and `<name>-initrd.img` under `root`.
    pub fn new(root: &Path, name: &str) -> Self {
        let files = [
            anchor(root, &format!("{name}{KERNEL_SUFFIX}")),
            anchor(root, &format!("{name}{INITRD_SUFFIX}")),
        ];
        Self {
            root: root.to_path_buf(),
            files,
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Map a decoded request path to an allow-listed file, if it is one.
    pub fn resolve(&self, requested: &str) -> Option<&Path> {
        let candidate = anchor(&self.root, requested);
        let wanted = candidate.as_os_str().as_encoded_bytes();
        self.files
            .iter()
            .find(|file| file.as_os_str().as_encoded_bytes() == wanted)
            .map(PathBuf::as_path)
    }
}

// ── HTTP handler ─────────────────────────────────────────────────────

fn router(files: ServeFiles) -> Router {
    Router::new()
        .fallback(serve_file)
        .with_state(Arc::new(files))
}

async fn serve_file(
    State(files): State<Arc<ServeFiles>>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Ok(requested) = percent_decode_str(uri.path()).decode_utf8() else {
        debug!(path = uri.path(), "Rejecting non UTF-8 path");
        return StatusCode::NOT_FOUND.into_response();
    };

    let Some(path) = files.resolve(&requested) else {
        debug!(path = %requested, "Not in allow-list");
        return StatusCode::NOT_FOUND.into_response();
    };

    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Allow-listed file cannot be opened");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let size = file.metadata().await.ok().map(|m| m.len());

    info!("Serving: {}", path.display());

    let mut resp = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response();
    if let Some(size) = size {
        resp.headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    resp
}

// ── FileServer ───────────────────────────────────────────────────────

/// Background listener serving a [`ServeFiles`] allow-list.
///
/// Runs until [`shutdown`](Self::shutdown) is called; dropping the handle
/// without calling it also stops the listener, but without waiting.
pub struct FileServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FileServer {
    /// Bind `addr` and start serving in a background task.
    pub async fn start(addr: SocketAddr, files: ServeFiles) -> Result<Self, CoreError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| CoreError::Bind { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| CoreError::Bind { addr, source })?;

        for file in files.files() {
            debug!(file = %file.display(), "Allow-listed");
        }

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let app = router(files);

        let task = tokio::spawn(async move {
            info!("Listening on http://{addr}");
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            match served {
                Ok(()) => debug!("http server exited"),
                Err(e) => warn!(error = %e, "http server exited with error"),
            }
        });

        Ok(Self {
            addr,
            cancel,
            task: Some(task),
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait up to `grace` for in-flight
    /// transfers; whatever is still running afterwards is aborted.
    pub async fn shutdown(mut self, grace: Duration) {
        info!("Shutting down http server...");
        self.cancel.cancel();

        let Some(mut task) = self.task.take() else {
            return;
        };
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "http server did not stop in time, aborting");
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
