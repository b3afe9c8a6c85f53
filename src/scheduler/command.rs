//! The unit of work the scheduler drives: a `ScheduledCommand`.
//!
//! Grounded on the teacher's (now-removed) `BackgroundJob` trait shape —
//! same idea of a context carrying a cancellation token, reshaped around
//! §4.6/§5's per-command execution model instead of fixed catalog jobs.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct CommandContext {
    pub execution_id: i64,
    pub cancellation: CancellationToken,
}

impl CommandContext {
    pub fn new(execution_id: i64, cancellation: CancellationToken) -> Self {
        Self { execution_id, cancellation }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[async_trait]
pub trait ScheduledCommand: Send + Sync {
    fn name(&self) -> &str;

    /// Helper commands are invoked only as a dependency of other commands
    /// (§GLOSSARY) and are excluded from the status listing.
    fn is_internal(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<serde_json::Value>;
}
