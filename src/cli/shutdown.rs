use anyhow::Result;
use tokio::select;

/// Resolves once the process is asked to stop, through Ctrl-C or, on unix, SIGTERM.
pub async fn detect_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => (),
        };
    }
    #[cfg(not(unix))]
    {
        select! {
            result = tokio::signal::ctrl_c() => result?,
        };
    }
    Ok(())
}
