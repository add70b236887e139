use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;

use super::peer::TestPeer;

/// A coordinator for multiple test peers
///
/// TestNetwork manages the lifecycle of the sessions under test and
/// provides utilities for introducing peers to each other and asserting
/// eventual consistency.
pub struct TestNetwork {
    /// All peers in the network, indexed by name
    peers: HashMap<String, TestPeer>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Start a sender session and return its share key
    pub async fn add_sender(&mut self, name: impl Into<String>) -> Result<String> {
        let name = name.into();
        if self.peers.contains_key(&name) {
            return Err(anyhow::anyhow!("peer '{}' already exists", name));
        }

        let (peer, key_hex) = TestPeer::sender(name.clone()).await?;
        self.peers.insert(name, peer);
        Ok(key_hex)
    }

    /// Start a receiver session joined to `key_hex`
    pub async fn add_receiver(&mut self, name: impl Into<String>, key_hex: &str) -> Result<()> {
        let name = name.into();
        if self.peers.contains_key(&name) {
            return Err(anyhow::anyhow!("peer '{}' already exists", name));
        }

        let peer = TestPeer::receiver(name.clone(), key_hex).await?;
        self.peers.insert(name, peer);
        Ok(())
    }

    /// Get a peer by name
    pub fn peer(&self, name: &str) -> Option<&TestPeer> {
        self.peers.get(name)
    }

    /// Get all peer names
    pub fn peer_names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Introduce all peers to each other for local discovery
    ///
    /// Manually adds each peer's direct socket addresses to all other
    /// peers, enabling immediate local connections without waiting for DHT
    /// propagation (which the testkit disables anyway).
    pub fn introduce_all_peers(&mut self) -> Result<()> {
        let peer_info: Vec<_> = self
            .peers
            .iter()
            .map(|(name, peer)| {
                (
                    name.clone(),
                    peer.id(),
                    peer.session()
                        .peer()
                        .endpoint()
                        .bound_sockets()
                        .into_iter()
                        .collect::<Vec<_>>(),
                )
            })
            .collect();

        tracing::debug!("introducing {} peers to each other", peer_info.len());

        for i in 0..peer_info.len() {
            for j in 0..peer_info.len() {
                if i != j {
                    let (ref peer_a_name, _, _) = peer_info[i];
                    let (ref peer_b_name, peer_b_id, ref peer_b_addrs) = peer_info[j];

                    let node_addr = iroh::NodeAddr::from_parts(
                        peer_b_id,
                        None, // no relay needed for local
                        peer_b_addrs.clone(),
                    );

                    let peer_a = self.peers.get_mut(peer_a_name).unwrap();
                    peer_a
                        .session()
                        .peer()
                        .endpoint()
                        .add_node_addr_with_source(node_addr, "testkit")?;

                    tracing::trace!(
                        "introduced {} to {} at {:?}",
                        peer_a_name,
                        peer_b_name,
                        peer_b_addrs
                    );
                }
            }
        }

        Ok(())
    }

    /// Remove a peer from the network and stop it
    pub async fn remove_peer(&mut self, name: &str) {
        if let Some(mut peer) = self.peers.remove(name) {
            peer.stop().await;
        }
    }

    /// Shutdown all peers in the network
    pub async fn shutdown(&mut self) {
        tracing::info!("shutting down test network with {} peers", self.peers.len());

        for (name, peer) in self.peers.iter_mut() {
            tracing::debug!("stopping peer: {}", name);
            peer.stop().await;
        }

        self.peers.clear();
    }

    /// Poll a condition until it succeeds or times out
    ///
    /// This is useful for testing eventual consistency across peers.
    /// Errors from the condition are treated as "not yet" since transient
    /// failures are expected while peers converge.
    pub async fn eventually<F, Fut>(&self, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(100);

        loop {
            match condition().await {
                Ok(true) => {
                    tracing::debug!("eventual condition met after {:?}", start.elapsed());
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!("eventual condition check error: {}", e);
                }
            }

            if start.elapsed() > timeout {
                return Err(anyhow::anyhow!(
                    "condition not met within timeout ({:?})",
                    timeout
                ));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Wait for a specific duration (helper for tests)
    pub async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
