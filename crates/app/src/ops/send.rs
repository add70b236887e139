use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use common::session::Session;

use crate::config::Config;

/// Share the sender folder and serve it until shutdown
///
/// Prints the session key for out-of-band sharing, then reads paths from
/// stdin: each line names a file under the sender folder to share into
/// the drive. Receivers already connected pick new shares up live.
pub async fn execute(config: &Config, mut shutdown_rx: watch::Receiver<()>) -> Result<()> {
    let (mut session, key_hex) = Session::create(config.send_session()).await?;

    println!("session key: {key_hex}");
    println!(
        "sharing {} - type a file path (relative to it) to share, ctrl-c to quit",
        config.source_dir().display()
    );

    let printer = tokio::spawn(super::print_events(session.events()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let path = line.trim();
                        if path.is_empty() {
                            continue;
                        }
                        match session.share_file(path).await {
                            Ok(entry) => {
                                println!("shared {} at version {}", entry.path, entry.version);
                            }
                            Err(e) => {
                                tracing::error!("could not share {}: {}", path, e);
                            }
                        }
                    }
                    // stdin closed; keep serving until a signal arrives
                    None => {
                        let _ = shutdown_rx.changed().await;
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    session.shutdown().await;
    printer.abort();
    Ok(())
}
