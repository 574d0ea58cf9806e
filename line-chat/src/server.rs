use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
};
use tracing::{info, warn};

use crate::{
    dispatcher::Dispatcher, jokes::JokeSource, registry::Registry, session::serve_connection,
};

pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub fn new(listener: TcpListener, jokes: Arc<dyn JokeSource>) -> Self {
        Self {
            listener,
            dispatcher: Arc::new(Dispatcher::new(Arc::new(Registry::new()), jokes)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.dispatcher.registry())
    }

    /// Accepts connections until `shutdown` resolves, then closes every session
    /// and waits for each one to finish its teardown.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            dispatcher,
        } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&dispatcher, &mut sessions).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &dispatcher, &mut sessions);
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    handle_session_exit(finished);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(dispatcher: &Dispatcher, sessions: &mut JoinSet<()>) {
    let closed = dispatcher.registry().close_all().await;
    info!(sessions = closed, "chat server shutting down");

    // Sessions accepted but not yet registered are closed as they register.
    while let Some(finished) = sessions.join_next().await {
        handle_session_exit(finished);
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    dispatcher: &Arc<Dispatcher>,
    sessions: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, dispatcher, sessions),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn handle_session_exit(finished: Result<(), JoinError>) {
    if let Err(err) = finished {
        warn!(error = ?err, "session task failed");
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: &Arc<Dispatcher>,
    sessions: &mut JoinSet<()>,
) {
    let dispatcher = Arc::clone(dispatcher);
    sessions.spawn(async move {
        if let Err(err) = serve_connection(stream, Some(peer), dispatcher).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}
