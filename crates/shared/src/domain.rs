use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Exec,
    File,
    Connect,
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Exec => "exec",
            EventKind::File => "file",
            EventKind::Connect => "connect",
            EventKind::Unknown => "unknown",
        }
    }

    /// Maps a wire `type` string, including the aliases the query backend
    /// accepts, onto a kind. Anything else is `Unknown`.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exec" => EventKind::Exec,
            "file" | "fileopen" | "file_open" => EventKind::File,
            "connect" | "network" => EventKind::Connect,
            _ => EventKind::Unknown,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHeader {
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub pid: u32,
    pub cgroup_id: String,
    pub comm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    Exec {
        parent_comm: String,
        filename: String,
        command_line: String,
    },
    File {
        filename: String,
        flags: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ino: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dev: Option<u64>,
    },
    Connect {
        family: u16,
        port: u16,
        addr: String,
    },
    Unknown,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Exec { .. } => EventKind::Exec,
            EventPayload::File { .. } => EventKind::File,
            EventPayload::Connect { .. } => EventKind::Connect,
            EventPayload::Unknown => EventKind::Unknown,
        }
    }
}

/// Canonical in-memory event. Every backend shape is folded into this record
/// before anything else in the client looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    pub header: EventHeader,
    pub blocked: bool,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl NormalizedEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }
}
