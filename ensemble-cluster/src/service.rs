//! tarpc service definition for node-to-node commands

use crate::command::{Command, Response};
use crate::error::EnsembleError;

/// Command propagation between nodes.
///
/// A remote node forwards each command to its peer, whose server hands it
/// to the local pipeline and returns the outcome unchanged.
#[tarpc::service]
pub trait EnsembleService {
    /// Execute a command on the receiving node
    async fn execute(command: Command) -> Result<Response, EnsembleError>;

    /// Simple ping for health checking
    async fn ping() -> String;
}
