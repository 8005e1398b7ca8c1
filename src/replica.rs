use crate::config::{quorum, ReplicaConfig};
use crate::intake::{Disposition, Intake};
use crate::kvstore::KVStore;
use crate::raft_log::Log;
use crate::message::{LogEntry, Message, MessageBody, BROADCAST};
use crate::role::{Role, RoleState};
use crate::timers::{ElectionTimer, HeartbeatTimer};
use crate::transport::Transport;
use anyhow::Result;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

/// Per-RPC batch cap for AppendEntries: bounds leader-side work per
/// message so a large backlog drains over multiple rounds.
const AE_BATCH_LIMIT: usize = 50;

/// One Raft replica: role state, log, commit/apply state, kv map, intake
/// FIFO, and timers, driven by a single-threaded cooperative loop.
pub struct Replica<T: Transport> {
    config: ReplicaConfig,
    role_state: RoleState,
    log: Log,
    commit_index: u64,
    last_applied: u64,
    kv: KVStore,
    intake: Intake,
    transport: T,
    election_timer: ElectionTimer,
    heartbeat_timer: HeartbeatTimer,
}

impl<T: Transport> Replica<T> {
    pub fn new(config: ReplicaConfig, mut transport: T) -> Result<Self> {
        let log = Log::new(&config.id);
        let hello = Message::new(config.id.clone(), BROADCAST, BROADCAST, MessageBody::Hello);
        transport.send(&hello)?;
        info!("[{}] started, broadcast hello", config.id);

        Ok(Replica {
            config,
            role_state: RoleState::new(),
            log,
            commit_index: 0,
            last_applied: 0,
            kv: KVStore::new(),
            intake: Intake::new(),
            transport,
            election_timer: ElectionTimer::new(),
            heartbeat_timer: HeartbeatTimer::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn current_term(&self) -> u64 {
        self.role_state.current_term
    }

    pub fn role_name(&self) -> &'static str {
        self.role_state.role.name()
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn kv_get(&self, key: &str) -> Option<&String> {
        self.kv.get(key)
    }

    /// Run the driver loop forever. Never blocks past one transport poll
    /// timeout and never terminates except by process exit.
    pub fn run(&mut self) -> ! {
        loop {
            self.tick();
        }
    }

    /// One iteration of the driver loop: drain transport, fire due timers,
    /// dispatch. Never returns an error: nothing is fatal at the replica
    /// level, so I/O failures are logged and the loop continues.
    pub fn tick(&mut self) {
        if let Err(e) = self.drain() {
            warn!("[{}] transport drain error: {}", self.config.id, e);
        }

        if self.role_state.role.is_leader() && self.heartbeat_timer.has_elapsed() {
            if let Err(e) = self.send_heartbeat_to_all() {
                warn!("[{}] heartbeat send error: {}", self.config.id, e);
            }
            self.heartbeat_timer.reset();
        }

        if !self.role_state.role.is_leader() && self.election_timer.has_elapsed() {
            if let Err(e) = self.start_election() {
                warn!("[{}] election send error: {}", self.config.id, e);
            }
        }

        if let Err(e) = self.dispatch() {
            warn!("[{}] dispatch error: {}", self.config.id, e);
        }
    }

    /// Drain every currently-readable datagram into the intake FIFO in
    /// arrival order.
    fn drain(&mut self) -> Result<()> {
        while let Some(msg) = self.transport.try_recv()? {
            self.intake.push_back(msg);
        }
        Ok(())
    }

    fn leader_field(&self) -> String {
        self.role_state
            .current_leader
            .clone()
            .unwrap_or_else(|| BROADCAST.to_string())
    }

    // ---- Role dispatch ----

    fn dispatch(&mut self) -> Result<()> {
        let mut deferred = Vec::new();
        while let Some(msg) = self.intake.pop_front() {
            match self.dispatch_one(msg)? {
                Disposition::Handled => {}
                Disposition::Requeue(msg) => deferred.push(msg),
                Disposition::Redispatch(msg) => self.intake.push_front(msg),
            }
        }
        self.intake.extend(deferred);
        Ok(())
    }

    fn dispatch_one(&mut self, msg: Message) -> Result<Disposition> {
        if matches!(msg.body, MessageBody::Hello) {
            // Nothing reacts to a peer's hello beyond broker registration;
            // dropping it here avoids it piling up in the intake forever.
            return Ok(Disposition::Handled);
        }

        match self.role_state.role {
            Role::Follower => self.dispatch_follower(msg),
            Role::Candidate { .. } => self.dispatch_candidate(msg),
            Role::Leader { .. } => self.dispatch_leader(msg),
        }
    }

    /// The common pre-rule: a protocol RPC with a strictly higher term
    /// forces a step-down. Returns `true` if it fired.
    fn apply_higher_term_rule(&mut self, msg: &Message) -> bool {
        if let Some(term) = msg.body.term() {
            if self.role_state.observe_term(term, &msg.src) {
                self.election_timer.reset();
                info!(
                    "[{}] stepping down to follower: saw term {} from {}",
                    self.config.id, term, msg.src
                );
                return true;
            }
        }
        false
    }

    fn dispatch_follower(&mut self, msg: Message) -> Result<Disposition> {
        self.apply_higher_term_rule(&msg);
        match msg.body {
            MessageBody::RequestVote { .. } => {
                self.handle_request_vote(msg)?;
                Ok(Disposition::Handled)
            }
            MessageBody::AppendEntries { .. } => {
                self.handle_append_entries(msg)?;
                Ok(Disposition::Handled)
            }
            MessageBody::Put { .. } | MessageBody::Get { .. } => {
                self.handle_client_request(msg)?;
                Ok(Disposition::Handled)
            }
            _ => Ok(Disposition::Requeue(msg)),
        }
    }

    fn dispatch_candidate(&mut self, msg: Message) -> Result<Disposition> {
        if self.apply_higher_term_rule(&msg) {
            return Ok(Disposition::Redispatch(msg));
        }

        match msg.body {
            MessageBody::RequestVote { .. } => {
                self.handle_request_vote(msg)?;
                Ok(Disposition::Handled)
            }
            MessageBody::RequestVoteResponse { .. } => {
                self.handle_request_vote_response(msg)?;
                Ok(Disposition::Handled)
            }
            MessageBody::AppendEntries { term, .. } if term >= self.role_state.current_term => {
                let leader = msg.src.clone();
                self.role_state.become_follower_under(Some(leader));
                self.handle_append_entries(msg)?;
                Ok(Disposition::Handled)
            }
            _ => Ok(Disposition::Requeue(msg)),
        }
    }

    fn dispatch_leader(&mut self, msg: Message) -> Result<Disposition> {
        if self.apply_higher_term_rule(&msg) {
            return Ok(Disposition::Redispatch(msg));
        }

        match msg.body {
            MessageBody::AppendEntriesResponse { .. } => {
                self.handle_append_entries_response(msg)?;
                Ok(Disposition::Handled)
            }
            MessageBody::Put { .. } | MessageBody::Get { .. } => {
                self.handle_client_request(msg)?;
                Ok(Disposition::Handled)
            }
            _ => Ok(Disposition::Requeue(msg)),
        }
    }

    // ---- Election subsystem ----

    fn start_election(&mut self) -> Result<()> {
        self.role_state.current_term += 1;
        self.role_state.voted_for = Some(self.config.id.clone());
        let mut votes_received = HashSet::new();
        votes_received.insert(self.config.id.clone());
        self.role_state.role = Role::Candidate { votes_received };
        self.election_timer.reset();

        let term = self.role_state.current_term;
        let last_log_index = self.log.last_index();
        let last_log_term = self.log.last_term();
        info!("[{}] starting election for term {}", self.config.id, term);

        let peers = self.config.peers.clone();
        for peer in peers {
            let msg = Message::new(
                self.config.id.clone(),
                peer,
                self.leader_field(),
                MessageBody::RequestVote {
                    term,
                    last_log_index,
                    last_log_term,
                },
            );
            self.transport.send(&msg)?;
        }

        // A lone replica (no peers) has an immediate majority of one.
        if votes_have_quorum(1, self.config.cluster_size()) {
            self.become_leader()?;
        }
        Ok(())
    }

    fn handle_request_vote(&mut self, msg: Message) -> Result<()> {
        let (term, last_log_index, last_log_term) = match msg.body {
            MessageBody::RequestVote { term, last_log_index, last_log_term } => {
                (term, last_log_index, last_log_term)
            }
            _ => unreachable!(),
        };

        let mut vote = false;
        if term == self.role_state.current_term {
            let already_voted_elsewhere = matches!(
                &self.role_state.voted_for,
                Some(v) if v != &msg.src
            );
            let log_up_to_date = last_log_term > self.log.last_term()
                || (last_log_term == self.log.last_term() && last_log_index >= self.log.last_index());

            if !already_voted_elsewhere && log_up_to_date {
                self.role_state.voted_for = Some(msg.src.clone());
                self.election_timer.reset();
                vote = true;
                info!("[{}] granted vote to {} for term {}", self.config.id, msg.src, term);
            } else {
                debug!(
                    "[{}] denied vote to {} for term {} (voted_for={:?}, up_to_date={})",
                    self.config.id, msg.src, term, self.role_state.voted_for, log_up_to_date
                );
            }
        }

        let reply = Message::new(
            self.config.id.clone(),
            msg.src,
            self.leader_field(),
            MessageBody::RequestVoteResponse { term: self.role_state.current_term, vote },
        );
        self.transport.send(&reply)
    }

    fn handle_request_vote_response(&mut self, msg: Message) -> Result<()> {
        let (term, vote) = match msg.body {
            MessageBody::RequestVoteResponse { term, vote } => (term, vote),
            _ => unreachable!(),
        };
        if term != self.role_state.current_term {
            return Ok(());
        }

        let reached_quorum = if let Role::Candidate { votes_received } = &mut self.role_state.role {
            if vote {
                votes_received.insert(msg.src.clone());
            }
            votes_have_quorum(votes_received.len(), self.config.cluster_size())
        } else {
            false
        };

        if reached_quorum {
            self.become_leader()?;
        }
        Ok(())
    }

    fn become_leader(&mut self) -> Result<()> {
        let last_index = self.log.last_index();
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for peer in &self.config.peers {
            next_index.insert(peer.clone(), last_index + 1);
            match_index.insert(peer.clone(), 0);
        }
        self.role_state.role = Role::Leader { next_index, match_index };
        self.role_state.current_leader = Some(self.config.id.clone());
        self.heartbeat_timer.reset();
        self.election_timer.reset();
        info!("[{}] became leader for term {}", self.config.id, self.role_state.current_term);
        self.send_heartbeat_to_all()
    }

    // ---- Replication subsystem ----

    fn send_heartbeat_to_all(&mut self) -> Result<()> {
        let peers = self.config.peers.clone();
        for peer in peers {
            self.send_append_entries_to(&peer, true)?;
        }
        Ok(())
    }

    fn replicate_to(&mut self, peer: &str) -> Result<()> {
        self.send_append_entries_to(peer, false)
    }

    fn send_append_entries_to(&mut self, peer: &str, heartbeat_only: bool) -> Result<()> {
        let next_index = match &self.role_state.role {
            Role::Leader { next_index, .. } => {
                *next_index.get(peer).unwrap_or(&(self.log.last_index() + 1))
            }
            _ => return Ok(()),
        };
        let prev_log_index = next_index.saturating_sub(1);
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
        let entries = if heartbeat_only {
            Vec::new()
        } else {
            self.log.slice_from(next_index, AE_BATCH_LIMIT)
        };

        let msg = Message::new(
            self.config.id.clone(),
            peer.to_string(),
            self.config.id.clone(),
            MessageBody::AppendEntries {
                term: self.role_state.current_term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            },
        );
        self.transport.send(&msg)
    }

    fn handle_append_entries(&mut self, msg: Message) -> Result<()> {
        let (term, prev_log_index, prev_log_term, entries, leader_commit) = match msg.body {
            MessageBody::AppendEntries { term, prev_log_index, prev_log_term, entries, leader_commit } => {
                (term, prev_log_index, prev_log_term, entries, leader_commit)
            }
            _ => unreachable!(),
        };

        // Step 1: any contact at or above our term resets the deadline.
        self.election_timer.reset();

        if term < self.role_state.current_term {
            return self.reply_append_entries(&msg.src, false, 0);
        }

        if self.log.len() as u64 <= prev_log_index || self.log.term_at(prev_log_index) != Some(prev_log_term) {
            return self.reply_append_entries(&msg.src, false, 0);
        }

        self.role_state.role = Role::Follower;
        self.role_state.current_leader = Some(msg.src.clone());

        let is_heartbeat = entries.is_empty();
        if !is_heartbeat {
            self.log.reconcile(prev_log_index, &entries);
        }

        if leader_commit > self.commit_index {
            // min(leader_commit, len(log)-1); guarded with the existing
            // commit_index so a stale/reordered AppendEntries can never
            // move commit_index backwards. Not capped to this call's own
            // prev_log_index/entries: on a heartbeat whose prev_log_index
            // trails the follower's true tail (e.g. the leader's next_index
            // went stale after a dropped success reply, which this never
            // re-probes since heartbeat replies are suppressed below), this
            // still advances commit_index up to the follower's actual log
            // tail instead of sticking at the heartbeat's prev_log_index.
            let candidate = leader_commit.min(self.log.last_index());
            self.commit_index = self.commit_index.max(candidate);
        }
        self.apply_up_to_commit();

        if is_heartbeat {
            return Ok(());
        }
        let match_index = self.log.last_index();
        self.reply_append_entries(&msg.src, true, match_index)
    }

    fn reply_append_entries(&mut self, to: &str, success: bool, match_index: u64) -> Result<()> {
        let reply = Message::new(
            self.config.id.clone(),
            to.to_string(),
            self.leader_field(),
            MessageBody::AppendEntriesResponse { term: self.role_state.current_term, success, match_index },
        );
        self.transport.send(&reply)
    }

    fn handle_append_entries_response(&mut self, msg: Message) -> Result<()> {
        let (success, match_index) = match msg.body {
            MessageBody::AppendEntriesResponse { success, match_index, .. } => (success, match_index),
            _ => unreachable!(),
        };
        let src = msg.src.clone();

        let still_leader = match &mut self.role_state.role {
            Role::Leader { next_index, match_index: match_idx_map } => {
                if success {
                    match_idx_map.insert(src.clone(), match_index);
                    next_index.insert(src.clone(), match_index + 1);
                } else {
                    let cur = *next_index.get(&src).unwrap_or(&1);
                    next_index.insert(src.clone(), cur.saturating_sub(1).max(1));
                }
                true
            }
            _ => false,
        };
        if !still_leader {
            return Ok(());
        }

        if !success {
            self.replicate_to(&src)?;
        }

        self.advance_commit_index();

        let newly_applied = self.apply_up_to_commit();
        for entry in &newly_applied {
            let reply = Message::new(
                self.config.id.clone(),
                entry.src.clone(),
                self.config.id.clone(),
                MessageBody::Ok { mid: entry.mid.clone(), value: None },
            );
            self.transport.send(&reply)?;
        }
        Ok(())
    }

    /// Scan from the tail down to `commit_index + 1`, stopping at the
    /// first (i.e. highest) index with a quorum of `match_index ≥ i`.
    ///
    /// This deliberately does not restrict to entries of the current
    /// term — the source this is ported from omits that guard, and it's
    /// preserved faithfully here rather than silently "fixed".
    fn advance_commit_index(&mut self) {
        let (match_idx_map, cluster_size) = match &self.role_state.role {
            Role::Leader { match_index, .. } => (match_index.clone(), self.config.cluster_size()),
            _ => return,
        };
        let need = quorum(cluster_size);
        let last_index = self.log.last_index();
        if last_index <= self.commit_index {
            return;
        }
        let mut i = last_index;
        loop {
            let count = 1 + match_idx_map.values().filter(|&&m| m >= i).count();
            if count >= need {
                self.commit_index = i;
                break;
            }
            if i == self.commit_index + 1 {
                break;
            }
            i -= 1;
        }
    }

    fn apply_up_to_commit(&mut self) -> Vec<LogEntry> {
        let mut applied = Vec::new();
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            if let Some(entry) = self.log.get(self.last_applied) {
                self.kv.apply(entry);
                applied.push(entry.clone());
            }
        }
        applied
    }

    // ---- Client handling ----

    fn handle_client_request(&mut self, msg: Message) -> Result<()> {
        let src = msg.src.clone();
        match msg.body {
            MessageBody::Get { key, mid } => self.handle_get(&src, &key, &mid),
            MessageBody::Put { key, value, mid } => {
                if self.role_state.role.is_leader() {
                    self.handle_put_as_leader(&src, key, value, mid)
                } else {
                    self.redirect_or_fail(&src, &mid)
                }
            }
            _ => unreachable!(),
        }
    }

    /// Served from the local map regardless of role: a follower that
    /// happens to hold the key answers directly, which can be stale.
    /// This is intentional, not a bug.
    fn handle_get(&mut self, client: &str, key: &str, mid: &str) -> Result<()> {
        if let Some(value) = self.kv.get(key).cloned() {
            let reply = Message::new(
                self.config.id.clone(),
                client.to_string(),
                self.leader_field(),
                MessageBody::Ok { mid: mid.to_string(), value: Some(value) },
            );
            self.transport.send(&reply)
        } else {
            self.redirect_or_fail(client, mid)
        }
    }

    /// Put and get are redirected identically when this replica can't
    /// serve them.
    fn redirect_or_fail(&mut self, client: &str, mid: &str) -> Result<()> {
        if let Some(leader) = self.role_state.current_leader.clone() {
            let reply = Message::new(self.config.id.clone(), client.to_string(), leader, MessageBody::Redirect { mid: mid.to_string() });
            self.transport.send(&reply)
        } else {
            let reply = Message::new(self.config.id.clone(), client.to_string(), BROADCAST.to_string(), MessageBody::Fail { mid: mid.to_string() });
            self.transport.send(&reply)
        }
    }

    fn handle_put_as_leader(&mut self, client: &str, key: String, value: String, mid: String) -> Result<()> {
        let entry = LogEntry { term: self.role_state.current_term, key, value, mid, src: client.to_string() };
        self.log.append(entry);
        let last_index = self.log.last_index();

        let peers = self.config.peers.clone();
        for peer in peers {
            let next_index = match &self.role_state.role {
                Role::Leader { next_index, .. } => *next_index.get(&peer).unwrap_or(&0),
                _ => 0,
            };
            if last_index >= next_index {
                self.replicate_to(&peer)?;
            }
        }
        Ok(())
    }
}

fn votes_have_quorum(have: usize, cluster_size: usize) -> bool {
    have >= quorum(cluster_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// An in-memory transport for unit tests: messages addressed to this
    /// replica's own id are delivered to it; anything else is recorded so
    /// tests can assert on what would have gone out over the wire.
    #[derive(Clone)]
    struct FakeTransport {
        id: String,
        inbox: Rc<RefCell<VecDeque<Message>>>,
        outbox: Rc<RefCell<Vec<Message>>>,
    }

    impl FakeTransport {
        fn new(id: &str) -> Self {
            FakeTransport {
                id: id.to_string(),
                inbox: Rc::new(RefCell::new(VecDeque::new())),
                outbox: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn deliver(&self, msg: Message) {
            self.inbox.borrow_mut().push_back(msg);
        }

        fn sent(&self) -> Vec<Message> {
            self.outbox.borrow().clone()
        }

        fn drain_sent(&self) -> Vec<Message> {
            self.outbox.borrow_mut().drain(..).collect()
        }
    }

    impl Transport for FakeTransport {
        fn send(&mut self, msg: &Message) -> Result<()> {
            self.outbox.borrow_mut().push(msg.clone());
            Ok(())
        }

        fn try_recv(&mut self) -> Result<Option<Message>> {
            Ok(self.inbox.borrow_mut().pop_front())
        }
    }

    fn addr() -> std::net::SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    fn new_replica(id: &str, peers: Vec<&str>) -> Replica<FakeTransport> {
        let cfg = ReplicaConfig::new(id, peers.into_iter().map(String::from).collect(), addr());
        Replica::new(cfg, FakeTransport::new(id)).unwrap()
    }

    #[test]
    fn starts_as_follower_at_term_zero_and_broadcasts_hello() {
        let r = new_replica("A", vec!["B", "C"]);
        assert_eq!(r.role_name(), "follower");
        assert_eq!(r.current_term(), 0);
        let sent = r.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].body, MessageBody::Hello));
    }

    #[test]
    fn single_node_cluster_becomes_leader_on_election() {
        let mut r = new_replica("A", vec![]);
        r.start_election().unwrap();
        assert_eq!(r.role_name(), "leader");
        assert_eq!(r.current_term(), 1);
    }

    #[test]
    fn grants_vote_when_log_up_to_date_and_unvoted() {
        let mut r = new_replica("A", vec!["B"]);
        let req = Message::new("B", "A", BROADCAST, MessageBody::RequestVote { term: 1, last_log_index: 0, last_log_term: 0 });
        r.transport.deliver(req);
        r.dispatch().unwrap();

        let sent = r.transport.drain_sent();
        let reply = sent.iter().find(|m| matches!(m.body, MessageBody::RequestVoteResponse { .. })).unwrap();
        match reply.body {
            MessageBody::RequestVoteResponse { vote, term } => {
                assert!(vote);
                assert_eq!(term, 1);
            }
            _ => unreachable!(),
        }
        assert_eq!(r.role_state.voted_for, Some("B".to_string()));
    }

    #[test]
    fn denies_second_vote_in_same_term() {
        let mut r = new_replica("A", vec!["B", "C"]);
        r.transport.deliver(Message::new("B", "A", BROADCAST, MessageBody::RequestVote { term: 1, last_log_index: 0, last_log_term: 0 }));
        r.dispatch().unwrap();
        r.transport.drain_sent();

        r.transport.deliver(Message::new("C", "A", BROADCAST, MessageBody::RequestVote { term: 1, last_log_index: 0, last_log_term: 0 }));
        r.dispatch().unwrap();
        let sent = r.transport.drain_sent();
        match &sent[0].body {
            MessageBody::RequestVoteResponse { vote, .. } => assert!(!vote),
            _ => unreachable!(),
        }
    }

    #[test]
    fn candidate_steps_down_on_higher_term_append_entries() {
        let mut r = new_replica("A", vec!["B", "C"]);
        r.start_election().unwrap();
        assert_eq!(r.current_term(), 1);
        r.transport.drain_sent();

        r.transport.deliver(Message::new(
            "B",
            "A",
            "B",
            MessageBody::AppendEntries { term: 3, prev_log_index: 0, prev_log_term: 0, entries: vec![], leader_commit: 0 },
        ));
        r.dispatch().unwrap();

        assert_eq!(r.role_name(), "follower");
        assert_eq!(r.current_term(), 3);
        assert_eq!(r.role_state.current_leader.as_deref(), Some("B"));
    }

    #[test]
    fn follower_truncates_on_log_conflict() {
        let mut r = new_replica("C", vec!["A"]);
        // log = [sentinel, {t=1,a}, {t=1,b}, {t=2,c}]
        r.log.append(LogEntry { term: 1, key: "a".into(), value: "a".into(), mid: "1".into(), src: "x".into() });
        r.log.append(LogEntry { term: 1, key: "b".into(), value: "b".into(), mid: "2".into(), src: "x".into() });
        r.log.append(LogEntry { term: 2, key: "c".into(), value: "c".into(), mid: "3".into(), src: "x".into() });
        r.role_state.current_term = 3;

        let entries = vec![
            LogEntry { term: 3, key: "b2".into(), value: "b2".into(), mid: "4".into(), src: "x".into() },
            LogEntry { term: 3, key: "c2".into(), value: "c2".into(), mid: "5".into(), src: "x".into() },
        ];
        r.transport.deliver(Message::new(
            "A",
            "C",
            "A",
            MessageBody::AppendEntries { term: 3, prev_log_index: 1, prev_log_term: 1, entries, leader_commit: 0 },
        ));
        r.dispatch().unwrap();

        assert_eq!(r.log.len(), 4);
        assert_eq!(r.log.get(2).unwrap().key, "b2");
        assert_eq!(r.log.get(3).unwrap().key, "c2");
    }

    #[test]
    fn leader_commits_and_replies_ok_after_majority_ack() {
        let mut r = new_replica("A", vec!["B", "C", "D", "E"]);
        r.become_leader().unwrap();
        r.transport.drain_sent();

        r.handle_client_request(Message::new("X", "A", BROADCAST, MessageBody::Put { key: "k1".into(), value: "v1".into(), mid: "m1".into() })).unwrap();
        assert_eq!(r.log.get(1).unwrap().key, "k1");
        assert_eq!(r.commit_index(), 0);

        for peer in ["B", "C"] {
            r.transport.deliver(Message::new(peer, "A", "A", MessageBody::AppendEntriesResponse { term: 1, success: true, match_index: 1 }));
        }
        r.dispatch().unwrap();

        assert_eq!(r.commit_index(), 1);
        assert_eq!(r.kv_get("k1"), Some(&"v1".to_string()));

        let oks: Vec<_> = r.transport.sent().into_iter().filter(|m| matches!(m.body, MessageBody::Ok { .. })).collect();
        assert_eq!(oks.len(), 1);
    }

    #[test]
    fn follower_put_is_redirected_to_known_leader() {
        let mut r = new_replica("B", vec!["A"]);
        r.role_state.current_leader = Some("A".to_string());
        r.transport.deliver(Message::new("X", "B", BROADCAST, MessageBody::Put { key: "k2".into(), value: "v2".into(), mid: "m2".into() }));
        r.dispatch().unwrap();

        let sent = r.transport.drain_sent();
        let redirect = sent.iter().find(|m| matches!(m.body, MessageBody::Redirect { .. })).unwrap();
        assert_eq!(redirect.leader, "A");
    }

    #[test]
    fn put_with_no_known_leader_fails_immediately() {
        let mut r = new_replica("B", vec!["A"]);
        r.transport.deliver(Message::new("X", "B", BROADCAST, MessageBody::Put { key: "k2".into(), value: "v2".into(), mid: "m2".into() }));
        r.dispatch().unwrap();

        let sent = r.transport.drain_sent();
        assert!(sent.iter().any(|m| matches!(m.body, MessageBody::Fail { .. })));
    }

    #[test]
    fn commit_index_never_regresses_on_stale_leader_commit() {
        let mut r = new_replica("C", vec!["A"]);
        r.commit_index = 2;
        r.log.append(LogEntry { term: 1, key: "a".into(), value: "a".into(), mid: "1".into(), src: "x".into() });
        r.log.append(LogEntry { term: 1, key: "b".into(), value: "b".into(), mid: "2".into(), src: "x".into() });
        r.role_state.current_term = 1;

        r.transport.deliver(Message::new(
            "A",
            "C",
            "A",
            MessageBody::AppendEntries { term: 1, prev_log_index: 2, prev_log_term: 1, entries: vec![], leader_commit: 0 },
        ));
        r.dispatch().unwrap();

        assert_eq!(r.commit_index(), 2);
    }
}
