//! §4.L Session Memory data shapes. The bounded-FIFO enforcement itself
//! lives in `rag-service::session_memory`; this module only defines what a
//! session looks like.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub turns: VecDeque<Turn>,
    pub last_touched: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Session { session_id, turns: VecDeque::new(), last_touched: now }
    }
}
