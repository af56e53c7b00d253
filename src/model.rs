//! Conversation, participant and message types as exchanged with the server

use crate::timestamp::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message type tag the server uses for non-interactive notices
pub const SYSTEM_MESSAGE_TYPE: &str = "SYSTEM";

/// A conversation member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Role tag (PATIENT, CAREGIVER, DOCTOR, ADMINISTRATOR)
    #[serde(rename = "type", default)]
    pub role: Option<String>,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    #[serde(default)]
    pub sender: Option<Participant>,
    #[serde(rename = "message", default)]
    pub body: String,
    /// Raw server timestamp, possibly without a zone suffix
    #[serde(default)]
    pub sent_at: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl Message {
    pub fn sender_id(&self) -> Option<i64> {
        self.sender.as_ref().map(|s| s.id)
    }

    /// System-typed, or without a sender at all
    pub fn is_system(&self) -> bool {
        let tagged = self
            .kind
            .as_deref()
            .map(|k| k.trim().eq_ignore_ascii_case(SYSTEM_MESSAGE_TYPE))
            .unwrap_or(false);
        tagged || self.sender.is_none()
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.sent_at.as_deref())
    }
}

/// Conversation summary as returned by the list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub last_read_message_id: Option<i64>,
    #[serde(default)]
    pub has_unread_messages: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Conversation {
    /// Later of the last message time and the creation time
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        let last_message = self.last_message.as_ref().and_then(|m| m.sent_at());
        let created = parse_timestamp(self.created_at.as_deref());
        last_message.max(created)
    }

    /// Name to show for the conversation.
    ///
    /// The trimmed name when set, else the participant names (the current user
    /// rendered as "You"), else `Chat #<id>`.
    pub fn display_label(&self, current_user_id: Option<i64>) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return name.to_string();
            }
        }

        let participants = self
            .participants
            .iter()
            .map(|p| {
                if Some(p.id) == current_user_id {
                    "You"
                } else {
                    p.name.as_str()
                }
            })
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        if participants.is_empty() {
            format!("Chat #{}", self.id)
        } else {
            participants
        }
    }
}

/// Paged response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub name: String,
    pub participant_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantsRequest {
    pub participant_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReadUpdateRequest {
    pub message_id: i64,
}
