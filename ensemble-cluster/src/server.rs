//! Command server: feeds commands received from peers into the local
//! pipeline

use crate::command::{Command, Response};
use crate::error::{EnsembleError, Result};
use crate::processor::Processor;
use crate::service::EnsembleService;
use crate::types::Endpoint;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::context::Context;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tarpc::tokio_util::codec::LengthDelimitedCodec;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// TCP server answering [`EnsembleService`] requests
pub struct EnsembleServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl EnsembleServer {
    /// Bind and start accepting connections
    pub async fn bind(endpoint: &Endpoint, processor: Arc<Processor>) -> Result<Self> {
        let listener = TcpListener::bind((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| {
                EnsembleError::Communication(format!("Failed to bind {}: {}", endpoint, e))
            })?;
        let local_addr = listener.local_addr()?;

        let handler = CommandHandler { processor };
        let accept_task = tokio::spawn(accept_loop(listener, handler));

        info!(addr = %local_addr, "Ensemble server started");
        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    /// Address actually bound, useful with port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close open connections
    pub fn stop(&self) {
        self.accept_task.abort();
        info!(addr = %self.local_addr, "Ensemble server stopped");
    }
}

impl Drop for EnsembleServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler) {
    // Dropping the set on abort closes every connection
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    connections.spawn(serve_connection(stream, peer, handler.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, handler: CommandHandler) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Cannot disable Nagle");
    }

    let transport = tarpc::serde_transport::new(
        Framed::new(stream, LengthDelimitedCodec::new()),
        Bincode::default(),
    );

    BaseChannel::with_defaults(transport)
        .execute(handler.serve())
        .for_each(|response| async move {
            tokio::spawn(response);
        })
        .await;

    debug!(peer = %peer, "Connection closed");
}

/// Handler that implements the EnsembleService
#[derive(Clone)]
struct CommandHandler {
    processor: Arc<Processor>,
}

impl EnsembleService for CommandHandler {
    async fn execute(self, _ctx: Context, command: Command) -> Result<Response> {
        debug!(command = command.name(), "Remote command received");
        self.processor.process(command).await
    }

    async fn ping(self, _ctx: Context) -> String {
        "pong".to_string()
    }
}
