use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

/// Completes on SIGINT or SIGTERM.
pub async fn interrupted() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(
                "Unable to install SIGTERM handler, only SIGINT stops the queue manager: {}",
                err
            );
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Unable to install SIGINT handler: {}", err);
                std::future::pending::<()>().await;
            }
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM."),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT."),
            Err(err) => {
                warn!("Unable to listen for SIGINT: {}", err);
                sigterm.recv().await;
            }
        },
    }
}
