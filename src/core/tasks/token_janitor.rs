// src/core/tasks/token_janitor.rs

//! Sweeps expired restore confirmation tokens out of the in-memory map.

use crate::core::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct TokenJanitor {
    state: Arc<AppState>,
}

impl TokenJanitor {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let swept = self.state.restore_tokens.sweep_expired();
                    if swept > 0 {
                        debug!(swept, "expired restore tokens swept");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("token janitor shutting down");
                    return;
                }
            }
        }
    }
}
