use crate::models::*;
use crate::config::DbPool;
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::schema::{bookmarks, rooms};
use crate::services::room::{find_room, primary_images};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use log::debug;

pub struct BookmarkService;

impl BookmarkService {
    /// Adds the bookmark when absent, removes it when present.
    pub async fn toggle(caller_id: i32, room: i32, pool: &DbPool) -> Result<BookmarkState, ApiError> {
        let state = db::run(pool, move |conn| {
            ensure_active(conn, caller_id)?;
            conn.transaction::<_, ApiError, _>(|conn| {
                let removed = diesel::delete(
                    bookmarks::table
                        .filter(bookmarks::user_id.eq(caller_id))
                        .filter(bookmarks::room_id.eq(room))
                )
                .execute(conn)?;

                let state = BookmarkState::after_toggle(removed);
                if !state.bookmarked {
                    return Ok(state);
                }

                find_room(conn, room)?;

                diesel::insert_into(bookmarks::table)
                    .values(&NewBookmark { user_id: caller_id, room_id: room })
                    .on_conflict((bookmarks::user_id, bookmarks::room_id))
                    .do_nothing()
                    .execute(conn)?;

                Ok(state)
            })
        })
        .await?;

        debug!("User {} bookmark on room {} is now {}", caller_id, room, state.bookmarked);
        Ok(state)
    }

    pub async fn status(caller_id: i32, room: i32, pool: &DbPool) -> Result<BookmarkState, ApiError> {
        db::run(pool, move |conn| {
            let count = bookmarks::table
                .filter(bookmarks::user_id.eq(caller_id))
                .filter(bookmarks::room_id.eq(room))
                .count()
                .get_result::<i64>(conn)?;
            Ok(BookmarkState { bookmarked: count > 0 })
        })
        .await
    }

    pub async fn list_mine(caller_id: i32, page: PageQuery, pool: &DbPool) -> Result<Paginated<BookmarkedRoom>, ApiError> {
        let (items, total) = db::run(pool, move |conn| {
            let total = bookmarks::table
                .filter(bookmarks::user_id.eq(caller_id))
                .count()
                .get_result::<i64>(conn)?;

            let rows = bookmarks::table
                .inner_join(rooms::table)
                .filter(bookmarks::user_id.eq(caller_id))
                .order((bookmarks::created_at.desc(), bookmarks::bookmark_id.desc()))
                .select((bookmarks::created_at, Room::as_select()))
                .limit(page.limit())
                .offset(page.offset())
                .load::<(NaiveDateTime, Room)>(conn)?;

            let ids: Vec<i32> = rows.iter().map(|(_, room)| room.room_id).collect();
            let mut images = primary_images(conn, &ids)?;

            let items = rows
                .into_iter()
                .map(|(bookmarked_at, room)| BookmarkedRoom {
                    bookmarked_at,
                    room: RoomListItem {
                        primary_image: images.remove(&room.room_id),
                        room,
                    },
                })
                .collect();
            Ok((items, total))
        })
        .await?;

        Ok(Paginated::new(items, &page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DB_INIT_SQL;

    #[test]
    fn second_toggle_removes_the_bookmark() {
        let first = BookmarkState::after_toggle(0);
        assert_eq!(first, BookmarkState { bookmarked: true });
        let second = BookmarkState::after_toggle(1);
        assert_eq!(second, BookmarkState { bookmarked: false });
    }

    #[test]
    fn one_row_per_user_and_room() {
        assert!(DB_INIT_SQL.contains("CONSTRAINT uq_bookmarks_user_room UNIQUE (user_id, room_id)"));
    }
}
