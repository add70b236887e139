//! End-to-end scenarios: sender and receivers converging over real
//! loopback connections.

use std::time::Duration;

use anyhow::Result;
use common::session::SessionEvent;
use common::testkit::TestNetwork;

/// Generous bound for loopback convergence; tests pass much faster
const CONVERGE: Duration = Duration::from_secs(15);

#[tokio::test]
async fn test_receiver_mirrors_shared_file() -> Result<()> {
    let mut net = TestNetwork::new();

    let key = net.add_sender("alice").await?;
    let alice = net.peer("alice").unwrap();
    alice.write_source("a.txt", b"hello")?;
    alice.share("a.txt").await?;

    net.add_receiver("bob", &key).await?;
    net.introduce_all_peers()?;
    net.peer("bob").unwrap().sync_now()?;

    net.eventually(CONVERGE, || async {
        Ok(net.peer("bob").unwrap().read_download("a.txt")? == b"hello")
    })
    .await?;

    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_new_share_reaches_live_receiver() -> Result<()> {
    let mut net = TestNetwork::new();

    let key = net.add_sender("alice").await?;
    net.peer("alice").unwrap().write_source("a.txt", b"hello")?;
    net.peer("alice").unwrap().share("a.txt").await?;

    net.add_receiver("bob", &key).await?;
    net.introduce_all_peers()?;
    net.peer("bob").unwrap().sync_now()?;

    net.eventually(CONVERGE, || async {
        Ok(net.peer("bob").unwrap().has_download("a.txt"))
    })
    .await?;

    // a second file shared while bob stays up arrives via the announce
    // path, without bob asking for it
    net.peer("alice").unwrap().write_source("b.txt", b"world")?;
    net.peer("alice").unwrap().share("b.txt").await?;

    net.eventually(CONVERGE, || async {
        Ok(net.peer("bob").unwrap().read_download("b.txt")? == b"world")
    })
    .await?;

    // the first file was untouched by the update
    assert_eq!(net.peer("bob").unwrap().read_download("a.txt")?, b"hello");

    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_receiver_joining_mid_update_lands_on_latest() -> Result<()> {
    let mut net = TestNetwork::new();

    let key = net.add_sender("alice").await?;
    let alice = net.peer("alice").unwrap();
    alice.write_source("a.txt", b"hello")?;
    alice.share("a.txt").await?;
    alice.write_source("a.txt", b"updated")?;
    alice.share("a.txt").await?;

    // bob joins after both versions exist and must end on the latest
    net.add_receiver("bob", &key).await?;
    net.introduce_all_peers()?;
    net.peer("bob").unwrap().sync_now()?;

    net.eventually(CONVERGE, || async {
        Ok(net.peer("bob").unwrap().read_download("a.txt")? == b"updated")
    })
    .await?;

    // and a live overwrite converges too
    net.peer("alice").unwrap().write_source("a.txt", b"final")?;
    net.peer("alice").unwrap().share("a.txt").await?;

    net.eventually(CONVERGE, || async {
        Ok(net.peer("bob").unwrap().read_download("a.txt")? == b"final")
    })
    .await?;

    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_removal_propagates() -> Result<()> {
    let mut net = TestNetwork::new();

    let key = net.add_sender("alice").await?;
    net.peer("alice").unwrap().write_source("a.txt", b"here")?;
    net.peer("alice").unwrap().share("a.txt").await?;

    net.add_receiver("bob", &key).await?;
    net.introduce_all_peers()?;
    net.peer("bob").unwrap().sync_now()?;

    net.eventually(CONVERGE, || async {
        Ok(net.peer("bob").unwrap().has_download("a.txt"))
    })
    .await?;

    net.peer("alice")
        .unwrap()
        .drive()
        .remove_file("a.txt")
        .await?;

    net.eventually(CONVERGE, || async {
        Ok(!net.peer("bob").unwrap().has_download("a.txt"))
    })
    .await?;

    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_two_receivers_converge() -> Result<()> {
    let mut net = TestNetwork::new();

    let key = net.add_sender("alice").await?;
    net.peer("alice").unwrap().write_source("docs/deep.txt", b"nested")?;
    net.peer("alice").unwrap().share("docs/deep.txt").await?;

    net.add_receiver("bob", &key).await?;
    net.add_receiver("carol", &key).await?;
    net.introduce_all_peers()?;
    net.peer("bob").unwrap().sync_now()?;
    net.peer("carol").unwrap().sync_now()?;

    for name in ["bob", "carol"] {
        net.eventually(CONVERGE, || async {
            Ok(net.peer(name).unwrap().read_download("docs/deep.txt")? == b"nested")
        })
        .await?;
    }

    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_sender_sees_peer_count_rise() -> Result<()> {
    let mut net = TestNetwork::new();

    let key = net.add_sender("alice").await?;
    net.peer("alice").unwrap().write_source("a.txt", b"x")?;
    net.peer("alice").unwrap().share("a.txt").await?;

    net.add_receiver("bob", &key).await?;
    net.introduce_all_peers()?;
    net.peer("bob").unwrap().sync_now()?;

    // bob's ping registers him at alice, which emits a peer-count event
    net.eventually(CONVERGE, || async {
        let seen = net
            .peer("alice")
            .unwrap()
            .events()
            .try_iter()
            .any(|event| matches!(event, SessionEvent::PeerCount(n) if n > 0));
        Ok(seen || net.peer("alice").unwrap().session().peer().registry().count() > 0)
    })
    .await?;

    net.shutdown().await;
    Ok(())
}
