//! Listening servers.
//!
//! A server owns one listener and a front object. Every accepted
//! connection gets its own read loop, request assembler and writer task:
//!
//! ```text
//! socket ─► Framer ─► load ─► RequestAssembler ─► Dispatcher ─► Deferred
//!                                                                  │
//! socket ◄─ Writer Task ◄─ encode_reply ◄─ dump ◄── on_complete ◄──┘
//! ```
//!
//! Requests are read in order but may complete in any order; each reply is
//! queued as one unit so replies never interleave on the socket. A reply
//! that cannot be queued within the backpressure timeout closes the
//! connection, so a dispatched request is never left unanswered on an open
//! socket.

mod registry;

pub use registry::ServerRegistry;

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::{watch, Notify};

use crate::config::TransportConfig;
use crate::deferred::Outcome;
use crate::dispatch::{CallContext, Dispatcher};
use crate::error::Result;
use crate::marshal::Marshal;
use crate::protocol::{encode_reply, Framer, RequestAssembler, Step};
use crate::space::ObjectSpace;
use crate::transport::{BoxedStream, Listener};
use crate::value::{LocalObject, Value};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A running server.
pub struct Server {
    uri: String,
    front: LocalObject,
    config: TransportConfig,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub(crate) fn new(uri: String, front: LocalObject, config: TransportConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            uri,
            front,
            config,
            shutdown,
        }
    }

    /// URI peers use to reach this server.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Object addressed by the nil reference.
    pub fn front(&self) -> &LocalObject {
        &self.front
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Stop accepting and close every connection of this server.
    ///
    /// Calls already dispatched still run; their replies are dropped.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("uri", &self.uri)
            .field("front", &self.front)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Bind `uri`, register the server and start accepting.
///
/// Must run on the reactor.
pub(crate) async fn start(space: ObjectSpace, uri: &str, front: LocalObject) -> Result<Arc<Server>> {
    let (transport, endpoint) = space.transports().resolve(uri)?;
    let listener = transport.listen(&endpoint).await?;

    let server = Arc::new(Server::new(
        listener.uri().to_string(),
        front,
        space.config().clone(),
    ));
    space.servers().insert(server.clone());

    let shutdown = server.shutdown.subscribe();
    tokio::spawn(accept_loop(space, server.clone(), listener, shutdown));

    tracing::info!("serving {:?} at {}", server.front(), server.uri());
    Ok(server)
}

async fn accept_loop(
    space: ObjectSpace,
    server: Arc<Server>,
    mut listener: Box<dyn Listener>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("accept failed on {}: {}", server.uri(), e);
                continue;
            }
        };

        if !server.config().permits(&peer) {
            tracing::warn!("connection from {} refused by ACL", peer);
            continue;
        }

        tracing::debug!("connection from {} on {}", peer, server.uri());
        let space = space.clone();
        let server = server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(space, &server, stream, &peer, shutdown).await {
                tracing::error!("connection from {} failed: {}", peer, e);
            }
            tracing::debug!("connection from {} closed", peer);
        });
    }

    tracing::info!("stopped serving {}", server.uri());
}

/// Read loop of one connection.
async fn serve_connection(
    space: ObjectSpace,
    server: &Server,
    stream: BoxedStream,
    peer: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let config = server.config();
    let (mut reader, write_half) = tokio::io::split(stream);
    let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());
    let stalled = Arc::new(Notify::new());

    let marshal = space.marshal_for(Some(server.uri().to_string()));
    let dispatcher = Dispatcher::new(space.clone(), config);
    let mut framer = Framer::with_load_limit(config.load_limit);
    let mut assembler = RequestAssembler::new(
        space.refs().clone(),
        server.front().clone(),
        config.arg_count_limit,
    );
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => read?,
            _ = shutdown.changed() => return Ok(()),
            _ = stalled.notified() => {
                tracing::warn!("closing connection from {}: peer is not reading replies", peer);
                writer_task.abort();
                return Ok(());
            }
        };
        if n == 0 {
            return Ok(());
        }

        let mut steps = Vec::new();
        let pushed = framer.push(&buf[..n], |value| {
            steps.push(assembler.feed(marshal.load(value)));
        });

        for step in steps {
            match step {
                Step::Pending => {}
                Step::Ready(request) => {
                    let context = CallContext::new(server.uri(), peer);
                    let marshal = marshal.clone();
                    let writer = writer.clone();
                    let stalled = stalled.clone();
                    dispatcher
                        .dispatch(request, context)
                        .on_complete(move |outcome| send_reply(&marshal, writer, stalled, outcome));
                }
                Step::Rejected(e) => {
                    send_reply(&marshal, writer.clone(), stalled.clone(), Err(e.into()))
                }
            }
        }

        // The writer task flushes this reply before the socket closes.
        if let Err(e) = pushed {
            tracing::warn!("closing connection from {}: {}", peer, e);
            send_reply(&marshal, writer, stalled, Err(e.into()));
            return Ok(());
        }
    }
}

/// Dump `outcome` and queue it as one reply.
///
/// Runs on the reactor. The frame is queued from its own task, which waits
/// out backpressure; if the writer stays full past the timeout or is gone,
/// `stalled` tells the read loop to drop the connection.
fn send_reply(marshal: &Marshal, writer: WriterHandle, stalled: Arc<Notify>, outcome: Outcome) {
    let (succeeded, value) = match outcome {
        Ok(value) => (true, value),
        Err(e) => (false, Value::Error(e)),
    };

    let reply = marshal
        .dump(&value, !succeeded)
        .and_then(|payload| encode_reply(succeeded, &payload))
        .or_else(|e| {
            tracing::warn!("reply not encodable, sending the error instead: {}", e);
            let payload = marshal.dump(&Value::Error(e.into()), true)?;
            encode_reply(false, &payload)
        });

    let bytes = match reply {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("failed to encode reply: {}", e);
            stalled.notify_one();
            return;
        }
    };

    tokio::spawn(async move {
        if let Err(e) = writer.send(OutboundFrame::new(bytes)).await {
            tracing::warn!("reply not queued: {}", e);
            stalled.notify_one();
        }
    });
}
