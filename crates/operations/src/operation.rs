//! Operation records, statuses and the conflict matrix.

use chrono::{DateTime, Utc};
use common::{ChatRoomId, CorrelationId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Status of a tracked operation.
///
/// `Pending` and `InProgress` are active; everything else is terminal and
/// freezes the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Reserved terminal value. Cancellation currently lands on `Failed`
    /// with `cancel_reason` set; see `OperationTracker::cancel`.
    Canceled,
    Compensated,
}

impl OperationStatus {
    /// All statuses, for persistence parsing.
    pub const ALL: [OperationStatus; 6] = [
        OperationStatus::Pending,
        OperationStatus::InProgress,
        OperationStatus::Completed,
        OperationStatus::Failed,
        OperationStatus::Canceled,
        OperationStatus::Compensated,
    ];

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "Pending",
            OperationStatus::InProgress => "InProgress",
            OperationStatus::Completed => "Completed",
            OperationStatus::Failed => "Failed",
            OperationStatus::Canceled => "Canceled",
            OperationStatus::Compensated => "Compensated",
        }
    }

    /// Parses a status from its persisted name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Returns true while the operation may still change.
    pub fn is_active(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::InProgress)
    }

    /// Returns true once the operation has reached a terminal status.
    pub fn is_completed(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of long-running action being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    CreateChat,
    DeleteChat,
    ArchiveChat,
    ChangeOwner,
    AddMember,
    RemoveMember,
    SendMessage,
    DeleteAllMessages,
}

impl OperationType {
    /// All types, for persistence parsing.
    pub const ALL: [OperationType; 8] = [
        OperationType::CreateChat,
        OperationType::DeleteChat,
        OperationType::ArchiveChat,
        OperationType::ChangeOwner,
        OperationType::AddMember,
        OperationType::RemoveMember,
        OperationType::SendMessage,
        OperationType::DeleteAllMessages,
    ];

    /// Returns the type name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateChat => "CreateChat",
            OperationType::DeleteChat => "DeleteChat",
            OperationType::ArchiveChat => "ArchiveChat",
            OperationType::ChangeOwner => "ChangeOwner",
            OperationType::AddMember => "AddMember",
            OperationType::RemoveMember => "RemoveMember",
            OperationType::SendMessage => "SendMessage",
            OperationType::DeleteAllMessages => "DeleteAllMessages",
        }
    }

    /// Parses a type from its persisted name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Conflict matrix for operations targeting the same room.
    ///
    /// A delete conflicts with every other active operation; an archive
    /// conflicts with everything except another archive; an ownership
    /// change conflicts with membership changes. The relation is
    /// symmetric.
    pub fn conflicts_with(&self, other: OperationType) -> bool {
        use OperationType::*;
        match (*self, other) {
            (DeleteChat, _) | (_, DeleteChat) => true,
            (ArchiveChat, ArchiveChat) => false,
            (ArchiveChat, _) | (_, ArchiveChat) => true,
            (ChangeOwner, AddMember | RemoveMember) => true,
            (AddMember | RemoveMember, ChangeOwner) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress/status record for one long-running action, correlated 1:1
/// with a saga instance by the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub correlation_id: CorrelationId,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub chat_room_id: Option<ChatRoomId>,
    pub message_id: Option<MessageId>,
    pub initiator_user_id: UserId,
    /// Non-decreasing while the operation is active.
    pub progress: i32,
    pub status_message: Option<String>,
    pub operation_data: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl Operation {
    /// Creates a fresh `Pending` record.
    pub fn new(
        correlation_id: CorrelationId,
        operation_type: OperationType,
        chat_room_id: Option<ChatRoomId>,
        message_id: Option<MessageId>,
        initiator_user_id: UserId,
        operation_data: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            operation_type,
            status: OperationStatus::Pending,
            chat_room_id,
            message_id,
            initiator_user_id,
            progress: 0,
            status_message: None,
            operation_data,
            result: None,
            error_message: None,
            error_code: None,
            cancel_reason: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_updated_at: now,
        }
    }

    /// Returns true while the operation may still change.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Returns true once the operation has reached a terminal status.
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    /// Returns true if a cancel request would take effect.
    pub fn can_be_cancelled(&self) -> bool {
        self.is_active()
    }
}
