use crate::models::*;
use crate::config::DbPool;
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::schema::{messages, users};
use crate::services::room::find_room;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use log::debug;

// Latest message per counterpart, newest conversation first
const CONVERSATIONS_SQL: &str = r#"
SELECT p.partner_id,
       u.name AS partner_name,
       u.profile_image AS partner_image,
       m.message_id AS last_message_id,
       m.sender_id AS last_sender_id,
       m.body AS last_body,
       m.created_at AS last_at,
       (SELECT COUNT(*) FROM messages un
         WHERE un.sender_id = p.partner_id AND un.receiver_id = $1 AND NOT un.is_read) AS unread_count
FROM (
    SELECT DISTINCT ON (partner_id) partner_id, message_id
    FROM (
        SELECT CASE WHEN sender_id = $1 THEN receiver_id ELSE sender_id END AS partner_id, message_id
        FROM messages
        WHERE sender_id = $1 OR receiver_id = $1
    ) pairs
    ORDER BY partner_id, message_id DESC
) p
JOIN messages m ON m.message_id = p.message_id
JOIN users u ON u.user_id = p.partner_id
ORDER BY m.message_id DESC
"#;

/// Ids of unread messages `caller_id` received from `partner`, up to and including `through`.
/// Opening a conversation at its latest page reads everything older too.
fn unread_through<'a>(caller_id: i32, partner: i32, through: i32) -> messages::BoxedQuery<'a, Pg, Integer> {
    messages::table
        .filter(messages::sender_id.eq(partner))
        .filter(messages::receiver_id.eq(caller_id))
        .filter(messages::is_read.eq(false))
        .filter(messages::message_id.le(through))
        .select(messages::message_id)
        .into_boxed()
}

pub struct MessageService;

impl MessageService {
    pub async fn send(caller_id: i32, request: SendMessageRequest, pool: &DbPool) -> Result<Message, ApiError> {
        let new_message = request.into_new_message(caller_id)?;

        let message = db::run(pool, move |conn| {
            ensure_active(conn, caller_id)?;
            let receiver_exists = users::table
                .find(new_message.receiver_id)
                .count()
                .get_result::<i64>(conn)?;
            if receiver_exists == 0 {
                return Err(ApiError::not_found("Receiver"));
            }
            if let Some(room) = new_message.room_id {
                find_room(conn, room)?;
            }

            Ok(diesel::insert_into(messages::table)
                .values(&new_message)
                .returning(Message::as_returning())
                .get_result::<Message>(conn)?)
        })
        .await?;

        debug!("Message {} sent from {} to {}", message.message_id, message.sender_id, message.receiver_id);
        Ok(message)
    }

    /// Messages between the caller and `partner`, oldest first. Without a cursor the latest
    /// page is returned; with `after_id` only newer messages are. Everything the caller received
    /// from `partner` up to the last returned message is marked read.
    pub async fn conversation(
        caller_id: i32,
        partner: i32,
        query: ConversationQuery,
        pool: &DbPool,
    ) -> Result<Vec<Message>, ApiError> {
        let limit = query.limit();

        db::run(pool, move |conn| {
            conn.transaction::<_, ApiError, _>(|conn| {
                let between = messages::sender_id
                    .eq(caller_id)
                    .and(messages::receiver_id.eq(partner))
                    .or(messages::sender_id.eq(partner).and(messages::receiver_id.eq(caller_id)));

                let mut page = match query.after_id {
                    Some(cursor) => messages::table
                        .filter(between)
                        .filter(messages::message_id.gt(cursor))
                        .order(messages::message_id.asc())
                        .select(Message::as_select())
                        .limit(limit)
                        .load::<Message>(conn)?,
                    None => {
                        let mut latest = messages::table
                            .filter(between)
                            .order(messages::message_id.desc())
                            .select(Message::as_select())
                            .limit(limit)
                            .load::<Message>(conn)?;
                        latest.reverse();
                        latest
                    }
                };

                if let Some(last) = page.last().map(|m| m.message_id) {
                    let marked = diesel::update(
                        messages::table.filter(messages::message_id.eq_any(unread_through(caller_id, partner, last)))
                    )
                    .set(messages::is_read.eq(true))
                    .execute(conn)?;
                    if marked > 0 {
                        debug!("Marked {} message(s) from {} to {} as read", marked, partner, caller_id);
                    }
                    for message in page.iter_mut().filter(|m| m.receiver_id == caller_id) {
                        message.is_read = true;
                    }
                }

                Ok(page)
            })
        })
        .await
    }

    pub async fn conversations(caller_id: i32, pool: &DbPool) -> Result<Vec<ConversationSummary>, ApiError> {
        db::run(pool, move |conn| {
            Ok(diesel::sql_query(CONVERSATIONS_SQL)
                .bind::<Integer, _>(caller_id)
                .load::<ConversationSummary>(conn)?)
        })
        .await
    }

    pub async fn unread_count(caller_id: i32, pool: &DbPool) -> Result<UnreadCount, ApiError> {
        db::run(pool, move |conn| {
            let unread_count = messages::table
                .filter(messages::receiver_id.eq(caller_id))
                .filter(messages::is_read.eq(false))
                .count()
                .get_result::<i64>(conn)?;
            Ok(UnreadCount { unread_count })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;

    #[test]
    fn read_marking_covers_older_messages_from_partner() {
        let sql = debug_query::<Pg, _>(&unread_through(1, 2, 60)).to_string();
        assert!(sql.contains("\"messages\".\"sender_id\" = $1"));
        assert!(sql.contains("\"messages\".\"receiver_id\" = $2"));
        assert!(sql.contains("\"messages\".\"is_read\" = $3"));
        assert!(sql.contains("\"messages\".\"message_id\" <= $4"));
        assert!(!sql.contains(">"));
        assert!(sql.contains("binds: [2, 1, false, 60]"));
    }
}
