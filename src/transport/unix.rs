//! Unix domain socket transport: `unix:/path[?option]`.
//!
//! `unix:` with an empty path listens on a generated socket under the
//! temp directory. The socket file is removed when the listener is dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{UnixListener, UnixStream};

use super::{split_option, BoxFuture, BoxedStream, Endpoint, Listener, Transport};
use crate::error::{ObjwireError, Result};

const PREFIX: &str = "unix:";

static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique socket path for this process.
///
/// Format: `{temp_dir}/objwire-{pid}-{counter}-{random}.sock`
pub fn generate_socket_path() -> PathBuf {
    let pid = std::process::id();
    let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("objwire-{}-{}-{:x}.sock", pid, n, rand_u64()))
}

/// Simple random u64 from system time and process id.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid
}

/// Unix domain sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixTransport;

impl Transport for UnixTransport {
    fn scheme(&self) -> &'static str {
        "unix"
    }

    fn parse(&self, uri: &str) -> Result<Endpoint> {
        let rest = uri
            .strip_prefix(PREFIX)
            .ok_or_else(|| ObjwireError::SchemeMismatch(uri.to_string()))?;
        let (path, option) = split_option(rest);
        Ok(Endpoint {
            uri: uri.to_string(),
            address: path.to_string(),
            option,
        })
    }

    fn listen<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Box<dyn Listener>>> {
        Box::pin(async move {
            let path = if endpoint.address.is_empty() {
                generate_socket_path()
            } else {
                PathBuf::from(&endpoint.address)
            };

            // Remove a stale socket left by an earlier run.
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            let listener = UnixListener::bind(&path)?;

            let mut uri = format!("{PREFIX}{}", path.display());
            if let Some(option) = &endpoint.option {
                uri.push('?');
                uri.push_str(option);
            }

            tracing::debug!("unix listener bound to {}", path.display());
            Ok(Box::new(UnixServerListener {
                listener,
                path,
                uri,
            }) as Box<dyn Listener>)
        })
    }

    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<BoxedStream>> {
        Box::pin(async move {
            if endpoint.address.is_empty() {
                return Err(ObjwireError::BadUri(endpoint.uri.clone()));
            }
            let stream = UnixStream::connect(&endpoint.address).await?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

struct UnixServerListener {
    listener: UnixListener,
    path: PathBuf,
    uri: String,
}

impl UnixServerListener {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Listener for UnixServerListener {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn accept(&mut self) -> BoxFuture<'_, Result<(BoxedStream, String)>> {
        Box::pin(async move {
            let (stream, _addr) = self.listener.accept().await?;
            Ok((Box::new(stream) as BoxedStream, self.uri.clone()))
        })
    }
}

impl Drop for UnixServerListener {
    fn drop(&mut self) {
        // Clean up socket file when listener is dropped
        let _ = std::fs::remove_file(self.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_generate_socket_path_format() {
        let path = generate_socket_path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();

        assert!(name.starts_with("objwire-"));
        assert!(name.ends_with(".sock"));
        assert!(name.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_generate_socket_path_uniqueness() {
        let paths: Vec<PathBuf> = (0..10).map(|_| generate_socket_path()).collect();
        for (i, p1) in paths.iter().enumerate() {
            for p2 in &paths[i + 1..] {
                assert_ne!(p1, p2);
            }
        }
    }

    #[test]
    fn test_parse() {
        let endpoint = UnixTransport.parse("unix:/tmp/app.sock?mode").unwrap();
        assert_eq!(endpoint.address, "/tmp/app.sock");
        assert_eq!(endpoint.option.as_deref(), Some("mode"));

        assert!(matches!(
            UnixTransport.parse("tcp://h:1"),
            Err(ObjwireError::SchemeMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_listen_connect_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let endpoint = UnixTransport
            .parse(&format!("unix:{}", path.display()))
            .unwrap();

        let mut listener = UnixTransport.listen(&endpoint).await.unwrap();
        assert!(path.exists());

        let target = endpoint.clone();
        let client = tokio::spawn(async move {
            let mut stream = UnixTransport.connect(&target).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        client.await.unwrap();

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_path_generates_socket() {
        let endpoint = UnixTransport.parse("unix:").unwrap();
        let listener = UnixTransport.listen(&endpoint).await.unwrap();

        let uri = listener.uri().to_string();
        let path = PathBuf::from(uri.strip_prefix("unix:").unwrap());
        assert!(path.exists());

        drop(listener);
        assert!(!path.exists());
    }
}
