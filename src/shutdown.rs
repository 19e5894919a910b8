use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::messages::AgentEvent;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// On either signal an [`AgentEvent::Shutdown`] is pushed into the agent's
/// event queue and the returned `CancellationToken` is cancelled so that
/// subsystems outside the event loop can drain as well.
pub fn install_shutdown_handler(events: mpsc::Sender<AgentEvent>) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        let _ = events.send(AgentEvent::Shutdown).await;
        token_clone.cancel();
    });

    token
}
