//! Transport layer for the MCP server.
//!
//! The server speaks MCP over standard input/output, the usual mode for
//! assistants that launch it as a subprocess.

pub mod stdio;

pub use stdio::StdioTransport;

use crate::error::DbResult;
use std::future::Future;

/// Trait for MCP transport implementations.
pub trait Transport: Send + Sync {
    /// Serve requests until the client disconnects or a signal arrives.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
