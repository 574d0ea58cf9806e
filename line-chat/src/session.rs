use std::{io, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    dispatcher::Dispatcher,
    protocol::{LineReader, encode_reply, write_line},
};

pub type SessionId = u64;

/// The shareable side of a session: what the registry and other sessions hold.
///
/// Outbound lines go through an unbounded queue drained by the session's own
/// writer task, so `send` never touches the socket.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<String>,
    closed: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            peer,
            outbound,
            closed,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queues one line for the peer. Best effort: returns `false` once the
    /// session is closed or its writer is gone.
    pub fn send(&self, line: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.send(line.into()).is_ok()
    }

    /// Stops the session's read loop and writer. Returns `true` only for the
    /// call that actually closed it.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called, immediately if it already was.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

/// Login state owned by the session's read loop.
#[derive(Debug)]
pub struct SessionState {
    handle: Arc<SessionHandle>,
    username: String,
    logged_in: bool,
}

impl SessionState {
    pub fn new(handle: Arc<SessionHandle>, username: String) -> Self {
        Self {
            handle,
            username,
            logged_in: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// One-way transition into the authenticated state.
    pub(crate) fn log_in(&mut self, username: String) {
        self.username = username;
        self.logged_in = true;
    }
}

/// Runs one client connection to completion.
///
/// Registers a placeholder username, processes lines strictly in arrival order,
/// and always tears down (close, deregister, drop the connection) before
/// returning, whether the peer hung up, an I/O error occurred, or the session
/// was closed from outside.
pub async fn serve_connection<S>(
    stream: S,
    peer: Option<SocketAddr>,
    dispatcher: Arc<Dispatcher>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let registry = Arc::clone(dispatcher.registry());
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = LineReader::new(BufReader::new(reader));

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let handle = Arc::new(SessionHandle::new(
        registry.next_session_id(),
        peer,
        outbound_tx,
    ));
    let username = registry.register(Arc::clone(&handle)).await;
    info!(?peer, session = handle.id(), %username, "client connected");

    let writer_task = spawn_writer(writer, outbound_rx, Arc::clone(&handle));
    let mut state = SessionState::new(Arc::clone(&handle), username);

    let outcome = run_read_loop(&mut reader, &mut state, &dispatcher).await;

    handle.close();
    if let Some(username) = registry.remove(handle.id()).await {
        info!(peer = ?handle.peer(), session = handle.id(), %username, "client disconnected");
    }
    if let Err(err) = writer_task.await {
        warn!(peer = ?handle.peer(), error = ?err, "session writer task failed");
    }

    outcome.map_err(Into::into)
}

async fn run_read_loop<R>(
    reader: &mut LineReader<R>,
    state: &mut SessionState,
    dispatcher: &Dispatcher,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let handle = Arc::clone(state.handle());

    loop {
        select! {
            _ = handle.closed() => {
                debug!(session = state.id(), "session closed externally");
                return Ok(());
            }
            line = reader.next_line() => {
                let Some(line) = line? else {
                    debug!(session = state.id(), "peer closed the connection");
                    return Ok(());
                };
                debug!(session = state.id(), username = state.username(), %line, "received line");
                let reply = dispatcher.dispatch(state, &line).await;
                state.handle().send(encode_reply(&reply));
            }
        }
    }
}

fn spawn_writer<W>(
    writer: W,
    outbound: mpsc::UnboundedReceiver<String>,
    handle: Arc<SessionHandle>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(write_outbound(writer, outbound, handle))
}

async fn write_outbound<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<String>,
    handle: Arc<SessionHandle>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = select! {
            biased;
            line = outbound.recv() => line,
            _ = handle.closed() => None,
        };
        let Some(line) = line else { break };

        // A peer that stopped reading must not hold the writer past close.
        select! {
            biased;
            written = write_line(&mut writer, &line) => {
                if let Err(err) = written {
                    debug!(session = handle.id(), ?err, "failed to deliver line to peer");
                    handle.close();
                    break;
                }
            }
            _ = handle.closed() => break,
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(session = handle.id(), ?err, "failed to shut down connection cleanly");
    }
}
