//! Message Mirror: local history of the chat platform's direct messages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use tandem_db::Database;
use tandem_db::models::NewMessage;
use tandem_types::api::{MessagesQuery, MessagesResponse, SaveMessageRequest, SaveMessageResponse};
use tandem_types::models::{Conversation, Message, MessageType};

use crate::directory::truncate;
use crate::error::ApiError;

const CONTENT_MAX: usize = 5000;
const STREAM_ID_MAX: usize = 255;
const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 200;

#[derive(Clone)]
pub struct MessageMirror {
    db: Arc<Database>,
}

impl MessageMirror {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Stores one message and refreshes its conversation. Replaying a message
    /// with the same `streamMsgId` overwrites the stored copy.
    pub fn save_message(&self, sender: Uuid, req: SaveMessageRequest) -> Result<SaveMessageResponse, ApiError> {
        let receiver = req.receiver_id.as_deref().map(str::trim).unwrap_or_default();
        let content = req.content.as_deref().unwrap_or_default();
        if receiver.is_empty() || content.trim().is_empty() {
            return Err(ApiError::validation("receiverId and content are required"));
        }

        let receiver: Uuid = receiver
            .parse()
            .map_err(|_| ApiError::validation("Invalid receiver id"))?;
        if receiver == sender {
            return Err(ApiError::validation("You can't message yourself"));
        }

        let stream_msg_id = req
            .stream_msg_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        if stream_msg_id.is_some_and(|id| id.len() > STREAM_ID_MAX) {
            return Err(ApiError::validation("streamMsgId is too long"));
        }

        let message_type = req
            .message_type
            .as_deref()
            .and_then(MessageType::parse)
            .unwrap_or_default();

        let (sender, receiver) = (sender.to_string(), receiver.to_string());
        if !self.db.account_exists(&receiver)? {
            return Err(ApiError::NotFound("Receiver not found"));
        }

        let content = truncate(content, CONTENT_MAX);
        let (conversation_id, row) = self
            .db
            .save_message(&NewMessage {
                sender_id: &sender,
                receiver_id: &receiver,
                content: &content,
                message_type: message_type.as_str(),
                stream_msg_id,
            })?
            .ok_or(ApiError::Conflict("streamMsgId is already in use"))?;
        debug!("Mirrored message {} into conversation {}", row.id, conversation_id);

        let message = Message::from(row);
        Ok(SaveMessageResponse {
            conversation_id: message.conversation_id,
            message,
        })
    }

    pub fn conversations(&self, me: Uuid) -> Result<Vec<Conversation>, ApiError> {
        let rows = self.db.conversations_for(&me.to_string())?;
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    /// History with `other`, oldest first. No conversation yet is an empty
    /// page with a null id, not an error.
    pub fn messages(&self, me: Uuid, other: &str, query: &MessagesQuery) -> Result<MessagesResponse, ApiError> {
        let other: Uuid = other
            .parse()
            .map_err(|_| ApiError::validation("Invalid user id"))?;
        let limit = parse_limit(query.limit.as_deref());
        let before = match query.before.as_deref().filter(|b| !b.is_empty()) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|ts| tandem_db::format_ts(ts.with_timezone(&Utc)))
                    .map_err(|_| ApiError::validation("Invalid before cursor"))?,
            ),
            None => None,
        };

        let Some(conversation_id) = self.db.find_conversation(&me.to_string(), &other.to_string())? else {
            return Ok(MessagesResponse {
                messages: Vec::new(),
                conversation_id: None,
            });
        };

        let rows = self.db.messages_in(&conversation_id, limit, before.as_deref())?;
        Ok(MessagesResponse {
            messages: rows.into_iter().map(Message::from).collect(),
            conversation_id: conversation_id.parse().ok(),
        })
    }
}

/// Missing, malformed or zero limits fall back to the default; the rest are
/// capped.
fn parse_limit(raw: Option<&str>) -> u32 {
    match raw.and_then(|l| l.trim().parse::<u32>().ok()) {
        Some(0) | None => DEFAULT_LIMIT,
        Some(n) => n.min(MAX_LIMIT),
    }
}
