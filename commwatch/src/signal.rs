use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

const SIGINT: i32 = 2;
#[cfg(unix)]
const SIGTERM: i32 = 15;

/// Termination signals, registered up front.
///
/// Install before any work starts so a `SIGTERM` that arrives while the
/// group is still forming is not lost to the default handler.
pub struct ShutdownSignals {
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignals {
    /// Must be called from within a tokio runtime.
    pub fn install() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for `SIGTERM` or Ctrl-C and return the signal number.
    pub async fn recv(&mut self) -> i32 {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
            SIGINT
        };

        #[cfg(unix)]
        let terminate = async {
            self.terminate.recv().await;
            SIGTERM
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<i32>();

        tokio::select! {
            signo = ctrl_c => signo,
            signo = terminate => signo,
        }
    }
}
