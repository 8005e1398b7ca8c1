use rand::Rng;
use std::time::{Duration, Instant};

/// Lower/upper bound for the randomized election timeout.
pub const ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(450);
pub const ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(600);

/// Heartbeat period, strictly below `ELECTION_TIMEOUT_MIN` so steady-state
/// leadership never spuriously triggers an election.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(400);

fn random_election_timeout() -> Duration {
    let mut rng = rand::thread_rng();
    rng.gen_range(ELECTION_TIMEOUT_MIN..=ELECTION_TIMEOUT_MAX)
}

/// The election deadline, reset on startup, a valid AppendEntries,
/// granting a vote, starting an election, or converting to Follower.
#[derive(Debug)]
pub struct ElectionTimer {
    deadline: Instant,
}

impl ElectionTimer {
    pub fn new() -> Self {
        ElectionTimer {
            deadline: Instant::now() + random_election_timeout(),
        }
    }

    pub fn reset(&mut self) {
        self.deadline = Instant::now() + random_election_timeout();
    }

    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl Default for ElectionTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// The heartbeat deadline, meaningful only while Leader.
#[derive(Debug)]
pub struct HeartbeatTimer {
    deadline: Instant,
}

impl HeartbeatTimer {
    pub fn new() -> Self {
        HeartbeatTimer {
            deadline: Instant::now() + HEARTBEAT_PERIOD,
        }
    }

    pub fn reset(&mut self) {
        self.deadline = Instant::now() + HEARTBEAT_PERIOD;
    }

    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl Default for HeartbeatTimer {
    fn default() -> Self {
        Self::new()
    }
}
