use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancels a shared token on SIGINT or SIGTERM so the daemon can stop cleanly.
///
/// Hand `token()` clones to the scheduler and anything else that should
/// finish its current step and exit.
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Listen in a background task; the task ends once the token is cancelled.
    pub fn spawn(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                name = wait_for_signal() => {
                    tracing::info!("received {}, stopping after the current step", name);
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() -> &'static str {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
        _ = sigterm() => "SIGTERM",
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!("cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
