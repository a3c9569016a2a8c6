use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A column name -> value mapping. `BTreeMap` keeps column order
/// deterministic so the same operation always lowers to the same SQL
/// text, which matters for the "apply is pure" invariant.
pub type Row = BTreeMap<String, Value>;

/// Logical operation type. Mirrors `payload`'s variant; kept as its own
/// type because the wire format and the `_ops` table both want a plain
/// `INSERT`/`UPDATE`/`DELETE` tag rather than the full payload shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OpType {
    Insert,
    Update,
    Delete,
}

impl OpType {
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Insert => "INSERT",
            OpType::Update => "UPDATE",
            OpType::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(OpType::Insert),
            "UPDATE" => Some(OpType::Update),
            "DELETE" => Some(OpType::Delete),
            _ => None,
        }
    }
}

/// The typed payload carried by an operation. This replaces the open
/// `data` map (plus reserved `_where` key) from the source design with a
/// tagged variant per type, so `_where` never has to be stripped at
/// apply time — it simply isn't part of the insert payload's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Payload {
    Insert {
        columns: Row,
    },
    Update {
        set: Row,
        #[serde(rename = "_where")]
        where_: Row,
    },
    Delete {
        #[serde(rename = "_where")]
        where_: Row,
    },
}

impl Payload {
    pub fn op_type(&self) -> OpType {
        match self {
            Payload::Insert { .. } => OpType::Insert,
            Payload::Update { .. } => OpType::Update,
            Payload::Delete { .. } => OpType::Delete,
        }
    }
}

/// A replayable mutation record. Pending while `seq == 0`; confirmed once
/// the authority assigns a nonzero `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub client_id: String,
    pub local_seq: u64,
    #[serde(default)]
    pub seq: u64,
    pub table: String,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Operation {
    /// Build a freshly-created local operation. `id` is
    /// `<clientId>_<localSeq>_<wallclockMs>`; uniqueness rests on
    /// `clientId`+`localSeq` alone, the wall-clock component is kept only
    /// as a free diagnostic ordering hint (see open question in §9).
    pub fn new_pending(
        client_id: &str,
        local_seq: u64,
        table: impl Into<String>,
        payload: Payload,
    ) -> Self {
        let id = format!("{client_id}_{local_seq}_{}", Utc::now().timestamp_millis());
        Self {
            id,
            client_id: client_id.to_string(),
            local_seq,
            seq: 0,
            table: table.into(),
            payload,
        }
    }

    pub fn op_type(&self) -> OpType {
        self.payload.op_type()
    }

    pub fn is_pending(&self) -> bool {
        self.seq == 0
    }
}

/// Envelope wrapping an operation on the wire. Unrecognized `type` values
/// deserialize to `Unknown` and are ignored by the transport adapter,
/// per the forward-compatibility rule in §4.E.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "op")]
    Op { operation: Operation },
    #[serde(other)]
    Unknown,
}
