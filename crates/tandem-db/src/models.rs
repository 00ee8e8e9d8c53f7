//! Database row types. These map directly to SQLite rows.
//! Distinct from tandem-types API models to keep the DB layer independent;
//! the conversions below are the only place the two meet.

use tracing::warn;
use uuid::Uuid;

use tandem_types::models::{
    CallRating, CallType, Conversation, FriendRequest, FriendRequestStatus, FriendRequestView,
    Message, MessageType, Participant, PublicProfile, User,
};

use crate::parse_ts;

pub(crate) fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}': {}", raw, e);
        Uuid::default()
    })
}

pub struct AccountRow {
    pub id: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub full_name: String,
    pub bio: String,
    pub profile_pic: String,
    pub native_language: String,
    pub learning_language: String,
    pub location: String,
    pub is_onboarded: bool,
    pub reset_token_hash: Option<String>,
    pub reset_expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AccountRow {
    /// Drops the credential columns. `friends` and `stickers` come from their
    /// own tables.
    pub fn into_user(self, friends: Vec<String>, stickers: Vec<String>) -> User {
        User {
            id: parse_id(&self.id),
            email: self.email,
            full_name: self.full_name,
            bio: self.bio,
            profile_pic: self.profile_pic,
            native_language: self.native_language,
            learning_language: self.learning_language,
            location: self.location,
            is_onboarded: self.is_onboarded,
            friends: friends.iter().map(|f| parse_id(f)).collect(),
            downloaded_stickers: stickers,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
        }
    }
}

/// Insert payload for a fresh account.
pub struct NewAccount<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub full_name: &'a str,
    pub profile_pic: &'a str,
}

/// Onboarding update; every field already validated and truncated.
pub struct ProfileUpdate<'a> {
    pub full_name: &'a str,
    pub bio: &'a str,
    pub native_language: &'a str,
    pub learning_language: &'a str,
    pub location: &'a str,
    pub profile_pic: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub id: String,
    pub full_name: String,
    pub profile_pic: String,
    pub bio: String,
    pub native_language: String,
    pub learning_language: String,
    pub location: String,
}

impl From<ProfileRow> for PublicProfile {
    fn from(row: ProfileRow) -> Self {
        PublicProfile {
            id: parse_id(&row.id),
            full_name: row.full_name,
            profile_pic: row.profile_pic,
            bio: row.bio,
            native_language: row.native_language,
            learning_language: row.learning_language,
            location: row.location,
        }
    }
}

pub struct FriendRequestRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_status(raw: &str) -> FriendRequestStatus {
    FriendRequestStatus::parse(raw).unwrap_or_else(|| {
        warn!("Unknown friend request status '{}'", raw);
        FriendRequestStatus::Pending
    })
}

impl From<FriendRequestRow> for FriendRequest {
    fn from(row: FriendRequestRow) -> Self {
        FriendRequest {
            id: parse_id(&row.id),
            sender: parse_id(&row.sender_id),
            recipient: parse_id(&row.recipient_id),
            status: parse_status(&row.status),
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

/// A friend request joined with both parties' profiles.
pub struct FriendRequestDetailRow {
    pub id: String,
    pub status: String,
    pub sender: ProfileRow,
    pub recipient: ProfileRow,
    pub created_at: String,
}

impl From<FriendRequestDetailRow> for FriendRequestView {
    fn from(row: FriendRequestDetailRow) -> Self {
        FriendRequestView {
            id: parse_id(&row.id),
            status: parse_status(&row.status),
            sender: row.sender.into(),
            recipient: row.recipient.into(),
            created_at: parse_ts(&row.created_at),
        }
    }
}

pub struct ConversationRow {
    pub id: String,
    pub participants: [ProfileRow; 2],
    pub last_message: String,
    pub last_message_type: String,
    pub last_message_at: String,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_message_type(raw: &str) -> MessageType {
    MessageType::parse(raw).unwrap_or_else(|| {
        warn!("Unknown message type '{}'", raw);
        MessageType::Text
    })
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: parse_id(&row.id),
            participants: row.participants.into_iter().map(PublicProfile::from).collect(),
            last_message: row.last_message,
            last_message_type: parse_message_type(&row.last_message_type),
            last_message_at: parse_ts(&row.last_message_at),
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

/// Insert payload for a mirrored message.
pub struct NewMessage<'a> {
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub content: &'a str,
    pub message_type: &'a str,
    pub stream_msg_id: Option<&'a str>,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_pic: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub receiver_pic: String,
    pub content: String,
    pub message_type: String,
    pub stream_msg_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: parse_id(&row.id),
            conversation_id: parse_id(&row.conversation_id),
            sender: Participant {
                id: parse_id(&row.sender_id),
                full_name: row.sender_name,
                profile_pic: row.sender_pic,
            },
            receiver: Participant {
                id: parse_id(&row.receiver_id),
                full_name: row.receiver_name,
                profile_pic: row.receiver_pic,
            },
            content: row.content,
            message_type: parse_message_type(&row.message_type),
            stream_msg_id: row.stream_msg_id,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

pub struct CallRatingRow {
    pub id: String,
    pub call_id: String,
    pub rater_id: String,
    pub rated_user_id: String,
    pub rating: u8,
    pub call_type: String,
    pub created_at: String,
}

impl From<CallRatingRow> for CallRating {
    fn from(row: CallRatingRow) -> Self {
        CallRating {
            id: parse_id(&row.id),
            call_id: row.call_id,
            rater_id: parse_id(&row.rater_id),
            rated_user_id: parse_id(&row.rated_user_id),
            rating: row.rating,
            call_type: CallType::parse(&row.call_type).unwrap_or_default(),
            created_at: parse_ts(&row.created_at),
        }
    }
}
