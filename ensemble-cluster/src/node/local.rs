use super::Node;
use crate::command::{Command, Response};
use crate::error::Result;
use crate::processor::Processor;
use async_trait::async_trait;
use std::sync::Arc;

/// This process, reached through its own command pipeline
pub struct LocalNode {
    name: String,
    host: String,
    port: u16,
    processor: Arc<Processor>,
}

impl LocalNode {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        processor: Arc<Processor>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            processor,
        }
    }
}

#[async_trait]
impl Node for LocalNode {
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
        Ok(())
    }

    /// Waits for the pipeline without a timeout
    async fn send(&self, command: Command) -> Result<Response> {
        self.processor.process(command).await
    }

    async fn disconnect(&self) {}
}
