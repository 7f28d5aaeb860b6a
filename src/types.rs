use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use ethers::types::H256;
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 32-byte hash or content reference
pub type Bytes32 = H256;

/// Free-form JSON object attached to plugin notifications
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Category of an application message, used to route it to a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Broadcast,
    Definition,
    Private,
}

/// Reference to a data item carried by a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRef {
    pub id: Uuid,
    pub hash: Option<Bytes32>,
}

/// Fields of a message covered by its seal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub id: Uuid,
    pub msg_type: MessageType,
    pub namespace: String,
    pub author: String,
    pub created: Option<DateTime<Utc>>,
    pub data_hash: Option<Bytes32>,
}

impl MessageHeader {
    /// Hash of the canonical JSON encoding of the header
    pub fn hash(&self) -> Result<Bytes32> {
        let encoded = serde_json::to_vec(self)?;
        Ok(H256::from(keccak256(encoded)))
    }
}

/// Application message exchanged between members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub hash: Option<Bytes32>,
    pub data: Vec<DataRef>,
}

impl Message {
    pub fn new(msg_type: MessageType, namespace: &str, author: &str, data: Vec<DataRef>) -> Self {
        Self {
            header: MessageHeader {
                id: Uuid::new_v4(),
                msg_type,
                namespace: namespace.to_string(),
                author: author.to_string(),
                created: None,
                data_hash: None,
            },
            hash: None,
            data,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.hash.is_some()
    }

    /// Seal the message
    ///
    /// Assigns the id and creation time if missing, then derives the data hash
    /// and the message hash. Sealing an already sealed message only verifies
    /// that nothing covered by the seal has changed since.
    ///
    /// # Returns
    /// * `Err(Error::Seal)` if a data reference has no hash, or the message
    ///   was modified after it was sealed
    pub fn seal(&mut self) -> Result<()> {
        let data_hash = self.data_hash()?;

        if let Some(sealed) = self.hash {
            if self.header.data_hash != Some(data_hash) || self.header.hash()? != sealed {
                return Err(Error::Seal(format!(
                    "message {} changed after it was sealed",
                    self.header.id
                )));
            }
            return Ok(());
        }

        if self.header.id.is_nil() {
            self.header.id = Uuid::new_v4();
        }
        if self.header.created.is_none() {
            self.header.created = Some(Utc::now());
        }
        self.header.data_hash = Some(data_hash);
        self.hash = Some(self.header.hash()?);
        Ok(())
    }

    /// Hash over the ordered hashes of the message's data
    fn data_hash(&self) -> Result<Bytes32> {
        let mut buf = Vec::with_capacity(self.data.len() * 32);
        for (i, data) in self.data.iter().enumerate() {
            let hash = data.hash.ok_or_else(|| {
                Error::Seal(format!("data[{}] ({}) has no hash", i, data.id))
            })?;
            buf.extend_from_slice(hash.as_bytes());
        }
        Ok(H256::from(keccak256(buf)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Ledger transaction pinning a batch payload reference
    BatchPin,
}

/// Transaction reference carried inside a batch payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRef {
    pub tx_type: TransactionType,
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub tx: TransactionRef,
    pub messages: Vec<Message>,
}

/// Sealed group of messages submitted together for anchoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub namespace: String,
    pub author: String,
    pub created: DateTime<Utc>,
    pub payload: BatchPayload,
    /// Content reference returned by the storage plugin. Written once by the
    /// dispatch pipeline before the batch is pinned.
    pub payload_ref: Option<Bytes32>,
}

impl Batch {
    /// Creates a batch pinned by a fresh transaction id
    pub fn new(namespace: &str, author: &str, messages: Vec<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            author: author.to_string(),
            created: Utc::now(),
            payload: BatchPayload {
                tx: TransactionRef {
                    tx_type: TransactionType::BatchPin,
                    id: Uuid::new_v4(),
                },
                messages,
            },
            payload_ref: None,
        }
    }
}

/// What a transaction anchors. The transaction hash is derived from this alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSubject {
    pub tx_type: TransactionType,
    pub namespace: String,
    pub author: String,
    pub batch: Uuid,
}

impl TransactionSubject {
    /// Deterministic hash of the subject, reproducible for auditing
    pub fn hash(&self) -> Result<Bytes32> {
        let encoded = serde_json::to_vec(self)?;
        Ok(H256::from(keccak256(encoded)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
        }
    }
}

/// Local record of a ledger-anchoring transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub subject: TransactionSubject,
    pub hash: Bytes32,
    pub status: TransactionStatus,
    pub created: DateTime<Utc>,
}

impl Transaction {
    /// Builds the pending pin transaction for a batch
    pub fn for_batch(batch: &Batch) -> Result<Self> {
        let subject = TransactionSubject {
            tx_type: TransactionType::BatchPin,
            namespace: batch.namespace.clone(),
            author: batch.author.clone(),
            batch: batch.id,
        };
        Ok(Self {
            id: batch.payload.tx.id,
            hash: subject.hash()?,
            subject,
            status: TransactionStatus::Pending,
            created: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    BlockchainBatchPin,
    PublicStorageBatchBroadcast,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::BlockchainBatchPin => "blockchain_batch_pin",
            OpType::PublicStorageBatchBroadcast => "publicstorage_batch_broadcast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Pending,
    Succeeded,
    Failed,
}

impl OpStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OpStatus::Pending)
    }

    /// Status only moves forward: a finished operation never goes back to
    /// pending and never flips between succeeded and failed.
    pub fn can_transition_to(&self, next: OpStatus) -> bool {
        !self.is_terminal() || *self == next
    }
}

/// Unit of work delegated to a plugin on behalf of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub namespace: String,
    pub message: Uuid,
    pub transaction: Uuid,
    /// Name of the plugin that owns the work
    pub plugin: String,
    /// Plugin-specific tracking id
    pub backend_id: String,
    pub op_type: OpType,
    pub status: OpStatus,
    pub error: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
}

impl Operation {
    /// Creates the operation record for one action taken on behalf of `msg`.
    ///
    /// The id is derived from the message id and the operation type, so
    /// dispatching the same message twice addresses the same record.
    pub fn new_message_op(
        plugin: &str,
        backend_id: &str,
        msg: &Message,
        transaction: Uuid,
        op_type: OpType,
        status: OpStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Self::message_op_id(msg.header.id, op_type),
            namespace: msg.header.namespace.clone(),
            message: msg.header.id,
            transaction,
            plugin: plugin.to_string(),
            backend_id: backend_id.to_string(),
            op_type,
            status,
            error,
            created: Utc::now(),
            updated: None,
        }
    }

    pub fn message_op_id(message: Uuid, op_type: OpType) -> Uuid {
        Uuid::new_v5(&message, op_type.as_str().as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPoolState {
    Pending,
    Confirmed,
}

/// Token pool announced by a tokens plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPool {
    /// May be absent until the pool is confirmed
    pub id: Option<Uuid>,
    pub namespace: String,
    pub name: String,
    pub protocol_id: String,
    pub state: TokenPoolState,
    pub info: JsonObject,
}

impl Default for TokenPool {
    fn default() -> Self {
        Self {
            id: None,
            namespace: String::new(),
            name: String::new(),
            protocol_id: String::new(),
            state: TokenPoolState::Pending,
            info: JsonObject::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PoolConfirmed,
    PoolRejected,
    TransactionConfirmed,
    TransactionFailed,
}

/// Append-only record of something that happened to an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub namespace: String,
    pub reference: Option<Uuid>,
    pub created: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, namespace: &str, reference: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            namespace: namespace.to_string(),
            reference,
            created: Utc::now(),
        }
    }
}
