use tokio::sync::watch;

/// A committed version transition, as seen by one watcher
///
/// `previous` is always the last version this watcher was told about, so a
/// consumer sees a gap-free series even when updates are coalesced: an
/// event spans every commit between `previous` (exclusive) and `current`
/// (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionEvent {
    pub previous: u64,
    pub current: u64,
}

/// Subscription to a drive's version counter
///
/// Created by `Drive::watch`. Each watcher tracks its own delivery cursor;
/// slow consumers coalesce intermediate versions instead of blocking the
/// committer. The stream ends when the drive is dropped.
#[derive(Debug)]
pub struct DriveWatcher {
    rx: watch::Receiver<u64>,
    last: u64,
}

impl DriveWatcher {
    pub(super) fn new(rx: watch::Receiver<u64>, last: u64) -> Self {
        Self { rx, last }
    }

    /// The newest version this watcher has delivered
    pub fn last_seen(&self) -> u64 {
        self.last
    }

    /// Wait for the next version transition
    ///
    /// Returns `None` once the drive has been dropped and no undelivered
    /// version remains. Cancel-safe: dropping the future between events
    /// loses nothing.
    pub async fn next_event(&mut self) -> Option<VersionEvent> {
        loop {
            {
                let current = *self.rx.borrow_and_update();
                if current > self.last {
                    let event = VersionEvent {
                        previous: self.last,
                        current,
                    };
                    self.last = current;
                    return Some(event);
                }
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_events_span_without_gaps() {
        let (tx, rx) = watch::channel(0u64);
        let mut watcher = DriveWatcher::new(rx, 0);

        tx.send(1).unwrap();
        let event = watcher.next_event().await.unwrap();
        assert_eq!(
            event,
            VersionEvent {
                previous: 0,
                current: 1
            }
        );

        tx.send(2).unwrap();
        let event = watcher.next_event().await.unwrap();
        assert_eq!(
            event,
            VersionEvent {
                previous: 1,
                current: 2
            }
        );
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_spanning_event() {
        let (tx, rx) = watch::channel(0u64);
        let mut watcher = DriveWatcher::new(rx, 0);

        for version in 1..=5u64 {
            tx.send(version).unwrap();
        }

        // the watcher was not polled during the burst, so it gets one event
        // covering the whole span
        let event = watcher.next_event().await.unwrap();
        assert_eq!(
            event,
            VersionEvent {
                previous: 0,
                current: 5
            }
        );
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_drops() {
        let (tx, rx) = watch::channel(3u64);
        let mut watcher = DriveWatcher::new(rx, 3);

        drop(tx);
        assert!(watcher.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_undelivered_version_survives_sender_drop() {
        let (tx, rx) = watch::channel(0u64);
        let mut watcher = DriveWatcher::new(rx, 0);

        tx.send(4).unwrap();
        drop(tx);

        // the pending transition is still delivered before the stream ends
        let event = watcher.next_event().await.unwrap();
        assert_eq!(
            event,
            VersionEvent {
                previous: 0,
                current: 4
            }
        );
        assert!(watcher.next_event().await.is_none());
    }
}
