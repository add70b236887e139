/// Lightweight test harness for multi-peer integration tests
///
/// This module provides a simple way to run several sessions against each
/// other in-process, without requiring external infrastructure. Mainline
/// discovery is disabled; peers are introduced to each other by their
/// bound socket addresses instead.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_share_round_trip() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new();
///
///     let key = net.add_sender("alice").await?;
///     net.peer("alice").unwrap().write_source("a.txt", b"hello")?;
///     net.peer("alice").unwrap().share("a.txt").await?;
///
///     net.add_receiver("bob", &key).await?;
///     net.introduce_all_peers()?;
///     net.peer("bob").unwrap().sync_now()?;
///
///     net.eventually(Duration::from_secs(5), || async {
///         Ok(net.peer("bob").unwrap().read_download("a.txt")? == b"hello")
///     })
///     .await?;
///
///     net.shutdown().await;
///     Ok(())
/// }
/// ```
mod network;
mod peer;

pub use network::TestNetwork;
pub use peer::TestPeer;
