//! [`DownloadServer`] – a one-file HTTP server with a fixed lifetime.
//!
//! Binds an ephemeral port, serves a single artifact at `/<file name>` and
//! stops accepting connections once its window elapses.
//!
//! * `GET` / `HEAD` on the artifact path → 200 with the file bytes.
//! * Any other path → 404.
//! * Any other method → 405.
//!
//! There is no authentication: anyone who can reach the bound address during
//! the window can fetch the file.  Bind to loopback unless the network is
//! trusted.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::ExportError;

/// Largest request head we are willing to buffer.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// How long a client may take to send its request line and headers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// DownloadServer
// ---------------------------------------------------------------------------

/// A bound, not yet serving, download endpoint for one artifact.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use chatmem_export::DownloadServer;
///
/// # async fn demo() -> Result<(), chatmem_export::ExportError> {
/// let server = DownloadServer::bind("memory_dbs/work.db", "127.0.0.1").await?;
/// println!("download: {}", server.url());
/// let downloads = server.serve_for(Duration::from_secs(14)).await;
/// # let _ = downloads;
/// # Ok(())
/// # }
/// ```
pub struct DownloadServer {
    listener: TcpListener,
    artifact: PathBuf,
    file_name: String,
    addr: SocketAddr,
}

impl DownloadServer {
    /// Bind an ephemeral port on `host` for serving `artifact`.
    ///
    /// # Errors
    ///
    /// [`ExportError::NotFound`] when `artifact` has no usable file name,
    /// [`ExportError::Bind`] when the listener cannot be opened.
    pub async fn bind(artifact: impl Into<PathBuf>, host: &str) -> Result<Self, ExportError> {
        let artifact = artifact.into();
        let file_name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ExportError::NotFound(artifact.display().to_string()))?
            .to_string();

        let listener = TcpListener::bind((host, 0)).await.map_err(ExportError::Bind)?;
        let addr = listener.local_addr().map_err(ExportError::Bind)?;
        debug!(%addr, file = %file_name, "download listener bound");

        Ok(Self {
            listener,
            artifact,
            file_name,
            addr,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The link a client should fetch.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, route_path(&self.file_name))
    }

    /// Serve the artifact until `window` elapses, then close the listener.
    ///
    /// Connections still in flight when the window closes are cut off.
    /// Returns the number of completed `GET` downloads.
    pub async fn serve_for(self, window: Duration) -> usize {
        let url = self.url();
        let Self {
            listener,
            artifact,
            file_name,
            ..
        } = self;

        let route = Arc::new(Route {
            path: route_path(&file_name),
            artifact,
            file_name,
        });
        let downloads = Arc::new(AtomicUsize::new(0));
        let deadline = Instant::now() + window;
        let mut connections = JoinSet::new();

        info!(%url, window_secs = window.as_secs_f32(), "download link open");

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let route = Arc::clone(&route);
                        let downloads = Arc::clone(&downloads);
                        connections.spawn(async move {
                            match handle_connection(stream, &route).await {
                                Ok(true) => {
                                    downloads.fetch_add(1, Ordering::SeqCst);
                                    info!(%peer, file = %route.file_name, "artifact downloaded");
                                }
                                Ok(false) => {}
                                Err(e) => debug!(%peer, error = %e, "download connection failed"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "download accept error"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        connections.shutdown().await;

        let served = downloads.load(Ordering::SeqCst);
        info!(%url, downloads = served, "download link closed");
        served
    }
}

struct Route {
    path: String,
    artifact: PathBuf,
    file_name: String,
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

/// Answer one request.  Returns `true` when the artifact body was sent.
async fn handle_connection(mut stream: TcpStream, route: &Route) -> io::Result<bool> {
    let head = read_request_head(&mut stream).await?;
    let request = String::from_utf8_lossy(&head);
    let mut request_line = request.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let target = request_line.next().unwrap_or("");
    let path = target.split('?').next().unwrap_or("");

    if method != "GET" && method != "HEAD" {
        let (allow, body) = ("Allow: GET, HEAD\r\n", b"method not allowed\n");
        write_response(&mut stream, "405 Method Not Allowed", allow, body).await?;
        return Ok(false);
    }
    if path != route.path {
        write_response(&mut stream, "404 Not Found", "", b"not found\n").await?;
        return Ok(false);
    }

    let body = match tokio::fs::read(&route.artifact).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            write_response(&mut stream, "404 Not Found", "", b"not found\n").await?;
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let headers = format!(
        "Content-Type: application/octet-stream\r\n\
         Content-Disposition: attachment; filename=\"{}\"\r\n",
        route.file_name.replace('"', "_")
    );
    if method == "HEAD" {
        write_head(&mut stream, "200 OK", &headers, body.len()).await?;
        stream.shutdown().await?;
        return Ok(false);
    }
    write_response(&mut stream, "200 OK", &headers, &body).await?;
    Ok(true)
}

async fn read_request_head(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    let mut filled = 0;
    let read = async {
        loop {
            let n = stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == buf.len() || buf[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        Ok::<_, io::Error>(())
    };
    timeout(REQUEST_TIMEOUT, read)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request head timed out"))??;
    buf.truncate(filled);
    Ok(buf)
}

async fn write_head(
    stream: &mut TcpStream,
    status: &str,
    headers: &str,
    len: usize,
) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {status}\r\n\
         {headers}\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n"
    );
    stream.write_all(head.as_bytes()).await
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    headers: &str,
    body: &[u8],
) -> io::Result<()> {
    write_head(stream, status, headers, body.len()).await?;
    stream.write_all(body).await?;
    stream.shutdown().await
}

/// `/` followed by the percent-encoded file name.
fn route_path(file_name: &str) -> String {
    let mut path = String::with_capacity(file_name.len() + 1);
    path.push('/');
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            path.push(byte as char);
        } else {
            path.push_str(&format!("%{byte:02X}"));
        }
    }
    path
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn fetch(addr: SocketAddr, request: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    fn artifact(dir: &tempfile::TempDir, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn route_path_percent_encodes_unsafe_bytes() {
        assert_eq!(route_path("work.db"), "/work.db");
        assert_eq!(route_path("my notes.db"), "/my%20notes.db");
        assert_eq!(route_path("a#b?.db"), "/a%23b%3F.db");
    }

    #[tokio::test]
    async fn url_points_at_bound_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "work.db", b"x");
        let server = DownloadServer::bind(&path, "127.0.0.1").await.unwrap();
        let port = server.local_addr().port();
        assert_ne!(port, 0);
        assert_eq!(server.url(), format!("http://127.0.0.1:{port}/work.db"));
    }

    #[tokio::test]
    async fn serves_artifact_and_counts_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "work.db", b"memory bytes");
        let server = DownloadServer::bind(&path, "127.0.0.1").await.unwrap();
        let addr = server.local_addr();
        let serving = tokio::spawn(server.serve_for(Duration::from_millis(500)));

        let response = fetch(addr, "GET /work.db HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK"), "got: {text}");
        assert!(text.contains("Content-Type: application/octet-stream"));
        assert!(text.contains("Content-Length: 12"));
        assert!(response.ends_with(b"memory bytes"));

        assert_eq!(serving.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "work.db", b"secret");
        let server = DownloadServer::bind(&path, "127.0.0.1").await.unwrap();
        let addr = server.local_addr();
        let serving = tokio::spawn(server.serve_for(Duration::from_millis(300)));

        let response = fetch(addr, "GET /other.db HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with(b"HTTP/1.1 404"));

        assert_eq!(serving.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_get_method_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "work.db", b"secret");
        let server = DownloadServer::bind(&path, "127.0.0.1").await.unwrap();
        let addr = server.local_addr();
        let serving = tokio::spawn(server.serve_for(Duration::from_millis(300)));

        let response = fetch(addr, "POST /work.db HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
        assert!(response.starts_with(b"HTTP/1.1 405"));

        assert_eq!(serving.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn listener_closes_after_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "work.db", b"x");
        let server = DownloadServer::bind(&path, "127.0.0.1").await.unwrap();
        let addr = server.local_addr();

        assert_eq!(server.serve_for(Duration::from_millis(50)).await, 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
