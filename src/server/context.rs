// src/server/context.rs

//! The fully initialized server context handed from setup to the task
//! spawner and the HTTP loop.

use crate::core::state::AppState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

pub struct ServerContext {
    /// The shared application state.
    pub state: Arc<AppState>,
    /// Closing this channel stops every background task.
    pub shutdown_tx: broadcast::Sender<()>,
    /// All long-running background tasks, awaited on shutdown.
    pub background_tasks: JoinSet<anyhow::Result<()>>,
}
