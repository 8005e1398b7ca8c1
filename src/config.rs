use std::net::SocketAddr;

/// Startup configuration for one replica.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub id: String,
    pub peers: Vec<String>,
    pub broker_addr: SocketAddr,
}

impl ReplicaConfig {
    pub fn new(id: impl Into<String>, peers: Vec<String>, broker_addr: SocketAddr) -> Self {
        ReplicaConfig {
            id: id.into(),
            peers,
            broker_addr,
        }
    }

    /// Total replica count including self, used for quorum math.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }
}

/// ⌈(N+1)/2⌉ for `total` replicas, i.e. a strict majority (GLOSSARY: Quorum).
pub fn quorum(total: usize) -> usize {
    total / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_of_five_is_three() {
        assert_eq!(quorum(5), 3);
    }

    #[test]
    fn quorum_of_four_is_three() {
        assert_eq!(quorum(4), 3);
    }

    #[test]
    fn quorum_of_one_is_one() {
        assert_eq!(quorum(1), 1);
    }
}
