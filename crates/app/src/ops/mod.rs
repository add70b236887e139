pub mod join;
pub mod send;

use futures::StreamExt;

use common::session::{SessionEvent, Severity};

/// Render session events to the log until the channel closes
///
/// The session core never prints anything itself; this is the CLI's
/// presentation of its status feed.
pub(crate) async fn print_events(events: flume::Receiver<SessionEvent>) {
    let mut stream = events.into_stream();
    while let Some(event) = stream.next().await {
        match event {
            SessionEvent::Status { message, severity } => match severity {
                Severity::Info => tracing::info!("{message}"),
                Severity::Success => tracing::info!("{message}"),
                Severity::Error => tracing::error!("{message}"),
            },
            SessionEvent::PeerCount(count) => {
                tracing::info!("connected peers: {count}");
            }
        }
    }
}
