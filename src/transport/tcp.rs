//! TCP transport: `tcp://host:port[?option]`.
//!
//! An empty host binds every interface; port 0 picks a free port and the
//! listener reports the port actually bound.

use tokio::net::{TcpListener, TcpStream};

use super::{split_option, BoxFuture, BoxedStream, Endpoint, Listener, Transport};
use crate::error::{ObjwireError, Result};

const PREFIX: &str = "tcp://";

/// Host advertised for listeners bound to every interface.
const ANY_HOST_ADVERTISED: &str = "127.0.0.1";

/// TCP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

fn parse_host_port(uri: &str) -> Result<(String, u16, Option<String>)> {
    let rest = uri
        .strip_prefix(PREFIX)
        .ok_or_else(|| ObjwireError::SchemeMismatch(uri.to_string()))?;
    let (address, option) = split_option(rest);
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ObjwireError::BadUri(uri.to_string()))?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ObjwireError::BadUri(uri.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ObjwireError::BadUri(uri.to_string()))?;
    Ok((host.to_string(), port, option))
}

impl Transport for TcpTransport {
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    /// An empty host connects to the host any-interface listeners advertise.
    fn parse(&self, uri: &str) -> Result<Endpoint> {
        let (host, port, option) = parse_host_port(uri)?;
        let host = if host.is_empty() {
            ANY_HOST_ADVERTISED
        } else {
            host.as_str()
        };
        Ok(Endpoint {
            uri: uri.to_string(),
            address: format!("{host}:{port}"),
            option,
        })
    }

    fn listen<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Box<dyn Listener>>> {
        Box::pin(async move {
            let (host, port, option) = parse_host_port(&endpoint.uri)?;
            let bind_host = if host.is_empty() { "0.0.0.0" } else { host.as_str() };
            let listener = TcpListener::bind((bind_host, port)).await?;
            let bound = listener.local_addr()?;

            let advertised = if host.is_empty() {
                ANY_HOST_ADVERTISED
            } else {
                host.as_str()
            };
            let mut uri = format!("{PREFIX}{advertised}:{}", bound.port());
            if let Some(option) = option {
                uri.push('?');
                uri.push_str(&option);
            }

            tracing::debug!("tcp listener bound to {} ({})", bound, uri);
            Ok(Box::new(TcpServerListener { listener, uri }) as Box<dyn Listener>)
        })
    }

    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<BoxedStream>> {
        Box::pin(async move {
            let stream = TcpStream::connect(endpoint.address.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

struct TcpServerListener {
    listener: TcpListener,
    uri: String,
}

impl Listener for TcpServerListener {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn accept(&mut self) -> BoxFuture<'_, Result<(BoxedStream, String)>> {
        Box::pin(async move {
            let (stream, peer) = self.listener.accept().await?;
            stream.set_nodelay(true)?;
            Ok((Box::new(stream) as BoxedStream, peer.ip().to_string()))
        })
    }
}
