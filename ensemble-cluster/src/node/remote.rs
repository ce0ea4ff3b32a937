//! Remote peer reached over the tarpc transport

use super::{Node, NodeFactory, NodeRef};
use crate::command::{Command, Response};
use crate::error::{EnsembleError, Result};
use crate::metrics::RemoteSendTimer;
use crate::service::EnsembleServiceClient;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::Duration;
use tarpc::client::Config as TarpcConfig;
use tarpc::context;
use tarpc::tokio_serde::formats::Bincode;
use tarpc::tokio_util::codec::LengthDelimitedCodec;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// A peer node in this or another cluster
///
/// One multiplexed connection per node; concurrent sends are correlated by
/// request id, so they do not wait on each other.
pub struct RemoteNode {
    name: String,
    host: String,
    port: u16,
    connect_timeout: Duration,
    timeout: Duration,
    client: RwLock<Option<EnsembleServiceClient>>,
}

impl RemoteNode {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            connect_timeout,
            timeout,
            client: RwLock::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.read().is_some()
    }

    /// Round-trip a ping through the transport
    pub async fn ping(&self) -> Result<String> {
        let client = self.client()?;
        self.ping_with(&client).await
    }

    async fn ping_with(&self, client: &EnsembleServiceClient) -> Result<String> {
        tokio::time::timeout(self.timeout, client.ping(self.context()))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(EnsembleError::from)
    }

    async fn open(&self) -> Result<EnsembleServiceClient> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| {
            EnsembleError::Communication(format!(
                "Connection to {}:{} timed out",
                self.host, self.port
            ))
        })?
        .map_err(|e| {
            EnsembleError::Communication(format!(
                "Failed to connect to {}:{}: {}",
                self.host, self.port, e
            ))
        })?;
        stream.set_nodelay(true)?;

        let transport = tarpc::serde_transport::new(
            Framed::new(stream, LengthDelimitedCodec::new()),
            Bincode::default(),
        );
        Ok(EnsembleServiceClient::new(TarpcConfig::default(), transport).spawn())
    }

    fn client(&self) -> Result<EnsembleServiceClient> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| EnsembleError::Communication(format!("Node {} is not connected", self.name)))
    }

    /// Create a context with the node timeout as deadline
    fn context(&self) -> context::Context {
        let mut ctx = context::current();
        ctx.deadline = std::time::Instant::now() + self.timeout;
        ctx
    }

    fn timed_out(&self) -> EnsembleError {
        EnsembleError::Communication(format!(
            "Node {} did not answer within {:?}",
            self.name, self.timeout
        ))
    }
}

#[async_trait]
impl Node for RemoteNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        debug!(node = %self.name, host = %self.host, port = self.port, "Connecting");
        let client = self.open().await?;
        // The peer must answer the service, not just accept TCP
        self.ping_with(&client).await?;

        let mut slot = self.client.write();
        if slot.is_none() {
            *slot = Some(client);
            info!(node = %self.name, host = %self.host, port = self.port, "Connected");
        }
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<Response> {
        let timer = RemoteSendTimer::new(&self.name);
        let result = match self.client() {
            Ok(client) => {
                match tokio::time::timeout(self.timeout, client.execute(self.context(), command))
                    .await
                {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => Err(EnsembleError::from(e)),
                    Err(_) => Err(self.timed_out()),
                }
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => timer.success(),
            Err(e) => timer.error(e.error_type()),
        }
        result
    }

    async fn disconnect(&self) {
        if self.client.write().take().is_some() {
            info!(node = %self.name, "Disconnected");
        }
    }
}

/// Builds [`RemoteNode`]s with the configured timeouts
#[derive(Debug, Clone)]
pub struct RemoteNodeFactory {
    connect_timeout: Duration,
    timeout: Duration,
}

impl RemoteNodeFactory {
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Self {
        Self {
            connect_timeout,
            timeout,
        }
    }
}

impl NodeFactory for RemoteNodeFactory {
    fn make_node(&self, host: &str, port: u16, name: &str) -> NodeRef {
        NodeRef::new(RemoteNode::new(
            name,
            host,
            port,
            self.connect_timeout,
            self.timeout,
        ))
    }
}
