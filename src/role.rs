use std::collections::{HashMap, HashSet};

/// The replica's role, modeled as a tagged union so that leader-only
/// replication tables and candidate-only vote tallies are unreachable
/// from the wrong role.
#[derive(Debug)]
pub enum Role {
    Follower,
    Candidate { votes_received: HashSet<String> },
    Leader {
        next_index: HashMap<String, u64>,
        match_index: HashMap<String, u64>,
    },
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Follower => "follower",
            Role::Candidate { .. } => "candidate",
            Role::Leader { .. } => "leader",
        }
    }
}

/// Term and vote bookkeeping common to every role.
#[derive(Debug)]
pub struct RoleState {
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub current_leader: Option<String>,
    pub role: Role,
}

impl RoleState {
    pub fn new() -> Self {
        RoleState {
            current_term: 0,
            voted_for: None,
            current_leader: None,
            role: Role::Follower,
        }
    }

    /// Common pre-rule applied to every inbound protocol RPC: a strictly
    /// higher term forces a step-down to Follower. Returns
    /// `true` if a step-down happened.
    pub fn observe_term(&mut self, msg_term: u64, msg_src: &str) -> bool {
        if msg_term > self.current_term {
            self.current_term = msg_term;
            self.voted_for = None;
            self.role = Role::Follower;
            self.current_leader = Some(msg_src.to_string());
            true
        } else {
            false
        }
    }

    pub fn become_follower_under(&mut self, leader: Option<String>) {
        self.role = Role::Follower;
        self.current_leader = leader;
    }
}

impl Default for RoleState {
    fn default() -> Self {
        Self::new()
    }
}
