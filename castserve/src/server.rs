//! Local HTTP media server.
//!
//! Renderers pull media over plain HTTP, so casting a local file means
//! serving it. [`MediaServer`] starts lazily on the first publish, binds the
//! first free port in a small fixed range, and serves published files under
//! token URLs with full byte-range support. An idle watchdog stops the
//! server again once every token has expired.

use std::io::{Read, Seek, SeekFrom};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use castcontrol::host::{FileSource, FsFileSource};

use crate::mime::mime_for_filename;
use crate::range::{ByteRange, parse_range};
use crate::registry::FileRegistry;

#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Inclusive port range probed in order at startup.
    pub port_min: u16,
    pub port_max: u16,
    /// Publish token lifetime, seconds.
    pub token_ttl_secs: u64,
    /// Server stops after the registry has been empty this long, seconds.
    pub idle_stop_secs: u64,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port_min: 9740,
            port_max: 9760,
            token_ttl_secs: 4 * 3600,
            idle_stop_secs: 600,
        }
    }
}

impl ServeConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("media file unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("no free port in {0}..={1}")]
    NoFreePort(u16, u16),
    #[error("building publish URL: {0}")]
    Url(String),
}

/// Handle returned by [`MediaServer::publish`].
#[derive(Debug, Clone)]
pub struct PublishedFile {
    /// Absolute URL a renderer can be pointed at.
    pub url: String,
    pub token: String,
    pub path: String,
    pub size: u64,
}

struct Running {
    runtime: tokio::runtime::Runtime,
    port: u16,
    shutdown: Arc<Notify>,
    /// Set by the serve task once it returns, whether by shutdown signal or
    /// idle stop. A stopped server is restarted on the next publish.
    stopped: Arc<AtomicBool>,
}

pub struct MediaServer {
    config: ServeConfig,
    file_source: Arc<dyn FileSource>,
    registry: Arc<FileRegistry>,
    running: Mutex<Option<Running>>,
}

impl MediaServer {
    pub fn new(file_source: Arc<dyn FileSource>, config: ServeConfig) -> Self {
        Self {
            config,
            file_source,
            registry: Arc::new(FileRegistry::new()),
            running: Mutex::new(None),
        }
    }

    /// Filesystem-backed server with default settings.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(FsFileSource), ServeConfig::default())
    }

    /// Publish a file and return its token URL. The server starts on the
    /// first publish; republishing a path refreshes its token deadline.
    pub fn publish(&self, path: &str) -> Result<PublishedFile, ServeError> {
        // Validate up front so a bad path fails here, not at play time.
        let size = self.file_source.len(path)?;
        let port = self.ensure_running()?;
        let (token, filename) = self.registry.publish(path, self.config.token_ttl());

        let host = castutils::guess_local_ip();
        let mut url = url::Url::parse(&format!("http://{host}:{port}"))
            .map_err(|e| ServeError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ServeError::Url("URL cannot carry a path".to_string()))?
            .push(&token)
            .push(&filename);

        info!(path, port, "file published");
        Ok(PublishedFile {
            url: url.to_string(),
            token,
            path: path.to_string(),
            size,
        })
    }

    /// Withdraw a published file. Its URL 404s from now on.
    pub fn unpublish(&self, path: &str) -> bool {
        self.registry.revoke_path(path)
    }

    /// Bound port while the server is up.
    pub fn port(&self) -> Option<u16> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|r| !r.stopped.load(Ordering::SeqCst))
            .map(|r| r.port)
    }

    /// Stop the server and drop its runtime. Idempotent; published tokens
    /// survive and the next publish restarts the listener.
    pub fn shutdown(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(running) = running {
            info!(port = running.port, "media server stopping");
            running.shutdown.notify_one();
            running.runtime.shutdown_timeout(Duration::from_secs(2));
        }
    }

    fn ensure_running(&self) -> Result<u16, ServeError> {
        let mut guard = self.running.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(running) = guard.as_ref() {
            if !running.stopped.load(Ordering::SeqCst) {
                return Ok(running.port);
            }
        }
        // Idle-stopped or never started: (re)build the runtime.
        if let Some(old) = guard.take() {
            old.runtime.shutdown_timeout(Duration::from_millis(100));
        }

        let running = self.start_server()?;
        let port = running.port;
        *guard = Some(running);
        Ok(port)
    }

    fn start_server(&self) -> Result<Running, ServeError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("castserve")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(bind_first_free(
            self.config.port_min,
            self.config.port_max,
        ))?;
        let port = listener
            .local_addr()
            .map_err(ServeError::Io)?
            .port();

        let shutdown = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let app = router(AppState {
            registry: Arc::clone(&self.registry),
            file_source: Arc::clone(&self.file_source),
        });

        {
            let shutdown = Arc::clone(&shutdown);
            let stopped = Arc::clone(&stopped);
            runtime.spawn(async move {
                let serve = axum::serve(listener, app.into_make_service())
                    .with_graceful_shutdown(async move { shutdown.notified().await });
                if let Err(e) = serve.await {
                    warn!(error = %e, "media server exited with error");
                }
                stopped.store(true, Ordering::SeqCst);
            });
        }

        {
            let registry = Arc::clone(&self.registry);
            let shutdown = Arc::clone(&shutdown);
            let idle_stop = Duration::from_secs(self.config.idle_stop_secs);
            runtime.spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(30));
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    registry.prune();
                    let idle = registry.idle_for().unwrap_or(Duration::ZERO);
                    if registry.is_empty() && idle > idle_stop {
                        info!("media server idle, stopping");
                        shutdown.notify_one();
                        break;
                    }
                }
            });
        }

        info!(port, "media server listening");
        Ok(Running {
            runtime,
            port,
            shutdown,
            stopped,
        })
    }
}

impl Drop for MediaServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn bind_first_free(min: u16, max: u16) -> Result<tokio::net::TcpListener, ServeError> {
    for port in min..=max {
        match tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServeError::NoFreePort(min, max))
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) registry: Arc<FileRegistry>,
    pub(crate) file_source: Arc<dyn FileSource>,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/{token}/{filename}", get(serve_file))
        .with_state(state)
}

async fn serve_file(
    State(state): State<AppState>,
    Path((token, _filename)): Path<(String, String)>,
    method: Method,
    headers: axum::http::HeaderMap,
) -> Response {
    let Some(entry) = state.registry.lookup(&token) else {
        return status_only(StatusCode::NOT_FOUND);
    };

    let total = {
        let source = Arc::clone(&state.file_source);
        let path = entry.path.clone();
        match tokio::task::spawn_blocking(move || source.len(&path)).await {
            Ok(Ok(total)) => total,
            Ok(Err(e)) => {
                // Published but gone from disk.
                warn!(path = entry.path, error = %e, "published file unreadable");
                return status_only(StatusCode::NOT_FOUND);
            }
            Err(_) => return status_only(StatusCode::INTERNAL_SERVER_ERROR),
        }
    };

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    let mime = mime_for_filename(&entry.filename);

    match parse_range(range_header, total) {
        ByteRange::Unsatisfiable => {
            debug!(token, range = ?range_header, total, "unsatisfiable range");
            let mut response = status_only(StatusCode::RANGE_NOT_SATISFIABLE);
            insert_header(
                &mut response,
                header::CONTENT_RANGE,
                &format!("bytes */{total}"),
            );
            response
        }
        ByteRange::Partial { start, end } => {
            let len = end - start + 1;
            let body = if method == Method::HEAD {
                Body::empty()
            } else {
                match read_slice(&state, &entry.path, start, len).await {
                    Ok(bytes) => Body::from(bytes),
                    Err(response) => return response,
                }
            };
            let mut response = with_body(StatusCode::PARTIAL_CONTENT, mime, body);
            insert_header(
                &mut response,
                header::CONTENT_RANGE,
                &format!("bytes {start}-{end}/{total}"),
            );
            insert_header(&mut response, header::CONTENT_LENGTH, &len.to_string());
            response
        }
        ByteRange::Full => {
            let body = if method == Method::HEAD || total == 0 {
                Body::empty()
            } else {
                match read_slice(&state, &entry.path, 0, total).await {
                    Ok(bytes) => Body::from(bytes),
                    Err(response) => return response,
                }
            };
            let mut response = with_body(StatusCode::OK, mime, body);
            insert_header(&mut response, header::CONTENT_LENGTH, &total.to_string());
            response
        }
    }
}

/// Read `len` bytes at `offset` through the file source, off the async
/// threads.
async fn read_slice(
    state: &AppState,
    path: &str,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>, Response> {
    let source = Arc::clone(&state.file_source);
    let path = path.to_string();

    let result = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let mut reader = source.open(&path)?;
        reader.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    })
    .await;

    match result {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => {
            warn!(error = %e, "reading published file failed");
            Err(status_only(StatusCode::INTERNAL_SERVER_ERROR))
        }
        Err(_) => Err(status_only(StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

fn status_only(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response
}

fn with_body(status: StatusCode, mime: &'static str, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    response
}

fn insert_header(response: &mut Response, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::io::Write;
    use tower::util::ServiceExt;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Temp file of `len` patterned bytes plus router-ready state, with one
    /// published token.
    fn fixture(len: usize, ttl: Duration) -> (tempfile::TempDir, Router, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.mp3");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&patterned(len))
            .unwrap();

        let registry = Arc::new(FileRegistry::new());
        let (token, _) = registry.publish(path.to_str().unwrap(), ttl);
        let app = router(AppState {
            registry,
            file_source: Arc::new(FsFileSource),
        });
        (dir, app, token)
    }

    fn request(token: &str, range: Option<&str>, method: Method) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("/{token}/media.mp3"));
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn range_request_returns_exact_slice() {
        let (_dir, app, token) = fixture(1000, Duration::from_secs(60));
        let response = app
            .oneshot(request(&token, Some("bytes=100-199"), Method::GET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            "bytes 100-199/1000"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 100);
        assert_eq!(&body[..], &patterned(1000)[100..200]);
    }

    #[tokio::test]
    async fn suffix_range_serves_the_tail() {
        let (_dir, app, token) = fixture(1000, Duration::from_secs(60));
        let response = app
            .oneshot(request(&token, Some("bytes=-50"), Method::GET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            "bytes 950-999/1000"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &patterned(1000)[950..]);
    }

    #[tokio::test]
    async fn no_range_serves_full_file_with_accept_ranges() {
        let (_dir, app, token) = fixture(1000, Duration::from_secs(60));
        let response = app
            .oneshot(request(&token, None, Method::GET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 1000);
    }

    #[tokio::test]
    async fn unsatisfiable_range_is_416_with_total() {
        let (_dir, app, token) = fixture(1000, Duration::from_secs(60));
        let response = app
            .oneshot(request(&token, Some("bytes=5000-"), Method::GET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    }

    #[tokio::test]
    async fn unknown_token_is_404() {
        let (_dir, app, _token) = fixture(1000, Duration::from_secs(60));
        let response = app
            .oneshot(request(
                &"0".repeat(32),
                None,
                Method::GET,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn expired_token_is_404() {
        let (_dir, app, token) = fixture(1000, Duration::ZERO);
        let response = app
            .oneshot(request(&token, None, Method::GET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn head_reports_length_without_a_body() {
        let (_dir, app, token) = fixture(1000, Duration::from_secs(60));
        let response = app
            .oneshot(request(&token, None, Method::HEAD))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn publish_serves_over_real_http() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"0123456789abcdef")
            .unwrap();
        let path = path.to_str().unwrap().to_string();

        let server = MediaServer::with_defaults();
        let published = server.publish(&path).unwrap();
        assert!(published.url.contains(&published.token));
        assert_eq!(published.size, 16);

        // Fetch through loopback; the advertised host is the LAN address.
        let port = server.port().unwrap();
        let local = format!("http://127.0.0.1:{port}/{}/track.mp3", published.token);

        let mut response = ureq::get(&local).call().unwrap();
        assert_eq!(
            response.body_mut().read_to_string().unwrap(),
            "0123456789abcdef"
        );

        let mut ranged = ureq::get(&local)
            .header("Range", "bytes=4-7")
            .call()
            .unwrap();
        assert_eq!(ranged.status(), 206);
        assert_eq!(ranged.body_mut().read_to_string().unwrap(), "4567");

        // Republish refreshes rather than re-minting.
        let again = server.publish(&path).unwrap();
        assert_eq!(again.token, published.token);

        server.shutdown();
        assert!(server.port().is_none());
    }
}
