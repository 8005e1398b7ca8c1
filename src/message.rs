use serde::{Deserialize, Serialize};

/// Sentinel used in `dst` to mean "every peer" and in `leader` to mean
/// "no known leader".
pub const BROADCAST: &str = "FFFF";

/// A single entry in the replicated log.
///
/// Index 0 of every replica's log is the sentinel entry
/// `{term: 0, key: "0", value: "0", mid: "0", src: <own id>}`; it is never
/// truncated and makes `prev_log_index`/`prev_log_term` always defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub key: String,
    pub value: String,
    #[serde(rename = "MID")]
    pub mid: String,
    pub src: String,
}

impl LogEntry {
    pub fn sentinel(self_id: &str) -> Self {
        LogEntry {
            term: 0,
            key: "0".to_string(),
            value: "0".to_string(),
            mid: "0".to_string(),
            src: self_id.to_string(),
        }
    }
}

/// The body of a message, tagged by the wire `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Hello,
    RequestVote {
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
    },
    RequestVoteResponse {
        term: u64,
        vote: bool,
    },
    AppendEntries {
        term: u64,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
    AppendEntriesResponse {
        term: u64,
        success: bool,
        match_index: u64,
    },
    Put {
        key: String,
        value: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    Get {
        key: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },
}

impl MessageBody {
    /// The `term` carried by protocol RPCs and their responses. Client
    /// messages (`put`/`get`/`ok`/`redirect`/`fail`/`hello`) carry none.
    pub fn term(&self) -> Option<u64> {
        match self {
            MessageBody::RequestVote { term, .. }
            | MessageBody::RequestVoteResponse { term, .. }
            | MessageBody::AppendEntries { term, .. }
            | MessageBody::AppendEntriesResponse { term, .. } => Some(*term),
            _ => None,
        }
    }
}

/// The full envelope sent over the wire. `src`/`dst`/`leader` are present
/// on every message regardless of body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub src: String,
    pub dst: String,
    pub leader: String,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    pub fn new(src: impl Into<String>, dst: impl Into<String>, leader: impl Into<String>, body: MessageBody) -> Self {
        Message {
            src: src.into(),
            dst: dst.into(),
            leader: leader.into(),
            body,
        }
    }
}
