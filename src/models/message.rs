use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use diesel::sql_types;

use crate::errors::ApiError;

pub const MAX_MESSAGE_LENGTH: usize = 2000;
pub const DEFAULT_CONVERSATION_LIMIT: i64 = 50;
pub const MAX_CONVERSATION_LIMIT: i64 = 200;

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Message {
    pub message_id: i32,
    pub sender_id: i32,
    pub receiver_id: i32,
    pub room_id: Option<i32>,
    pub body: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::messages)]
pub struct NewMessage {
    pub sender_id: i32,
    pub receiver_id: i32,
    pub room_id: Option<i32>,
    pub body: String,
}

#[derive(Deserialize, Debug)]
pub struct SendMessageRequest {
    pub receiver_id: i32,
    pub room_id: Option<i32>,
    pub body: String,
}

impl SendMessageRequest {
    pub fn into_new_message(self, sender_id: i32) -> Result<NewMessage, ApiError> {
        if self.receiver_id == sender_id {
            return Err(ApiError::validation("You cannot send a message to yourself"));
        }
        let body = self.body.trim();
        if body.is_empty() {
            return Err(ApiError::validation("Message body must not be empty"));
        }
        if body.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ApiError::validation(format!(
                "Message body must be at most {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }
        Ok(NewMessage {
            sender_id,
            receiver_id: self.receiver_id,
            room_id: self.room_id,
            body: body.to_string(),
        })
    }
}

/// Polling cursor: clients pass the last message id they have seen.
#[derive(Deserialize, Debug, Default)]
pub struct ConversationQuery {
    pub after_id: Option<i32>,
    pub limit: Option<i64>,
}

impl ConversationQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_CONVERSATION_LIMIT)
            .min(MAX_CONVERSATION_LIMIT)
    }
}

#[derive(QueryableByName, Serialize, Debug)]
pub struct ConversationSummary {
    #[diesel(sql_type = sql_types::Int4)]
    pub partner_id: i32,
    #[diesel(sql_type = sql_types::Varchar)]
    pub partner_name: String,
    #[diesel(sql_type = sql_types::Nullable<sql_types::Varchar>)]
    pub partner_image: Option<String>,
    #[diesel(sql_type = sql_types::Int4)]
    pub last_message_id: i32,
    #[diesel(sql_type = sql_types::Int4)]
    pub last_sender_id: i32,
    #[diesel(sql_type = sql_types::Text)]
    pub last_body: String,
    #[diesel(sql_type = sql_types::Timestamp)]
    pub last_at: NaiveDateTime,
    #[diesel(sql_type = sql_types::BigInt)]
    pub unread_count: i64,
}

#[derive(Serialize, Debug)]
pub struct UnreadCount {
    pub unread_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(receiver_id: i32, body: &str) -> SendMessageRequest {
        SendMessageRequest { receiver_id, room_id: None, body: body.to_string() }
    }

    #[test]
    fn body_is_trimmed() {
        let message = request(2, "  is the room still available?  ").into_new_message(1).unwrap();
        assert_eq!(message.body, "is the room still available?");
        assert_eq!(message.receiver_id, 2);
    }

    #[test]
    fn rejects_self_and_blank_messages() {
        assert!(request(1, "hello").into_new_message(1).is_err());
        assert!(request(2, "   ").into_new_message(1).is_err());
    }

    #[test]
    fn rejects_overlong_body() {
        let long = "a".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(request(2, &long).into_new_message(1).is_err());
        let exact = "a".repeat(MAX_MESSAGE_LENGTH);
        assert!(request(2, &exact).into_new_message(1).is_ok());
    }

    #[test]
    fn conversation_limit_is_bounded() {
        assert_eq!(ConversationQuery::default().limit(), DEFAULT_CONVERSATION_LIMIT);
        let query = ConversationQuery { after_id: Some(10), limit: Some(10_000) };
        assert_eq!(query.limit(), MAX_CONVERSATION_LIMIT);
    }
}
