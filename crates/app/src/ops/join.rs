use anyhow::Result;
use tokio::sync::watch;

use common::session::Session;

use crate::config::Config;

/// Join a share and mirror it until shutdown
pub async fn execute(
    key_hex: &str,
    config: &Config,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<()> {
    let mut session = Session::join(key_hex, config.join_session()).await?;

    println!(
        "joined session, mirroring into {} - ctrl-c to quit",
        config.downloads_dir().display()
    );

    let printer = tokio::spawn(super::print_events(session.events()));

    let _ = shutdown_rx.changed().await;

    session.shutdown().await;
    printer.abort();
    Ok(())
}
