use std::collections::{BTreeSet, HashMap};

use crate::models::*;
use crate::config::DbPool;
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::middleware::AuthUser;
use crate::schema::{facilities, room_facilities, room_images, rooms, users};
use crate::services::ReviewService;
use chrono::Utc;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use log::{debug, info};
use rust_decimal::Decimal;

const PRIMARY_RACE: &str = "Another primary image was set at the same time; please retry";

/// Search filters with blank input already stripped.
#[derive(Debug, Clone, Default)]
struct SearchFilter {
    city: Option<String>,
    text: Option<String>,
    min_price: Option<Decimal>,
    max_price: Option<Decimal>,
    facility_id: Option<i32>,
    available_only: bool,
}

impl From<&RoomSearchQuery> for SearchFilter {
    fn from(query: &RoomSearchQuery) -> Self {
        Self {
            city: query.city_pattern(),
            text: query.text_pattern(),
            min_price: query.min_price,
            max_price: query.max_price,
            facility_id: query.facility_id,
            available_only: query.available_only.unwrap_or(true),
        }
    }
}

fn filtered_rooms<'a>(filter: &SearchFilter) -> rooms::BoxedQuery<'a, Pg> {
    let mut query = rooms::table.into_boxed();

    if filter.available_only {
        query = query.filter(rooms::is_available.eq(true));
    }
    if let Some(pattern) = &filter.city {
        query = query.filter(rooms::city.ilike(pattern.clone()));
    }
    if let Some(pattern) = &filter.text {
        query = query.filter(
            rooms::title.ilike(pattern.clone()).or(rooms::description.ilike(pattern.clone()))
        );
    }
    if let Some(min) = filter.min_price {
        query = query.filter(rooms::price_per_month.ge(min));
    }
    if let Some(max) = filter.max_price {
        query = query.filter(rooms::price_per_month.le(max));
    }
    if let Some(facility) = filter.facility_id {
        query = query.filter(
            rooms::room_id.eq_any(
                room_facilities::table
                    .filter(room_facilities::facility_id.eq(facility))
                    .select(room_facilities::room_id)
            )
        );
    }

    query
}

/// Primary image URL per room for a page of listings.
pub(crate) fn primary_images(conn: &mut PgConnection, room_ids: &[i32]) -> Result<HashMap<i32, String>, ApiError> {
    if room_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = room_images::table
        .filter(room_images::room_id.eq_any(room_ids))
        .filter(room_images::is_primary.eq(true))
        .select((room_images::room_id, room_images::image_url))
        .load::<(i32, String)>(conn)?;
    Ok(rows.into_iter().collect())
}

pub(crate) fn with_primary_images(conn: &mut PgConnection, list: Vec<Room>) -> Result<Vec<RoomListItem>, ApiError> {
    let ids: Vec<i32> = list.iter().map(|r| r.room_id).collect();
    let mut images = primary_images(conn, &ids)?;
    Ok(list
        .into_iter()
        .map(|room| RoomListItem {
            primary_image: images.remove(&room.room_id),
            room,
        })
        .collect())
}

pub(crate) fn find_room(conn: &mut PgConnection, id: i32) -> Result<Room, ApiError> {
    rooms::table
        .find(id)
        .select(Room::as_select())
        .first::<Room>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Room"))
}

/// Loads a room the caller may modify: its owner, or an admin when `admin_allowed`.
pub(crate) fn owned_room(conn: &mut PgConnection, id: i32, caller: &AuthUser, admin_allowed: bool) -> Result<Room, ApiError> {
    let room = find_room(conn, id)?;
    if room.owner_id == caller.user_id || (admin_allowed && caller.is_admin()) {
        Ok(room)
    } else {
        debug!("User {} attempted to modify room {} owned by {}", caller.user_id, id, room.owner_id);
        Err(ApiError::forbidden("You do not own this room"))
    }
}

pub struct RoomService;

impl RoomService {
    pub async fn search(query: RoomSearchQuery, pool: &DbPool) -> Result<Paginated<RoomListItem>, ApiError> {
        query.validate_range()?;
        let page = query.page_query();
        let sort = query.sort.unwrap_or_default();
        let filter = SearchFilter::from(&query);

        let (items, total) = db::run(pool, move |conn| {
            let total = filtered_rooms(&filter).count().get_result::<i64>(conn)?;

            let base = filtered_rooms(&filter).select(Room::as_select());
            let ordered = match sort {
                RoomSort::Newest => base.order((rooms::created_at.desc(), rooms::room_id.desc())),
                RoomSort::PriceAsc => base.order((rooms::price_per_month.asc(), rooms::room_id.asc())),
                RoomSort::PriceDesc => base.order((rooms::price_per_month.desc(), rooms::room_id.asc())),
            };
            let list = ordered
                .limit(page.limit())
                .offset(page.offset())
                .load::<Room>(conn)?;

            Ok((with_primary_images(conn, list)?, total))
        })
        .await?;

        debug!("Room search matched {} rooms", total);
        Ok(Paginated::new(items, &page, total))
    }

    pub async fn show(id: i32, pool: &DbPool) -> Result<RoomDetail, ApiError> {
        db::run(pool, move |conn| {
            let room = find_room(conn, id)?;

            let owner = users::table
                .find(room.owner_id)
                .select(PublicUser::as_select())
                .first::<PublicUser>(conn)?;

            let images = room_images::table
                .filter(room_images::room_id.eq(id))
                .order((room_images::is_primary.desc(), room_images::image_id.asc()))
                .select(RoomImage::as_select())
                .load::<RoomImage>(conn)?;

            let room_facility_list = facilities::table
                .inner_join(room_facilities::table)
                .filter(room_facilities::room_id.eq(id))
                .order(facilities::name.asc())
                .select(Facility::as_select())
                .load::<Facility>(conn)?;

            let rating = ReviewService::rating_summary(conn, id)?;

            Ok(RoomDetail {
                room,
                owner,
                images,
                facilities: room_facility_list,
                rating,
            })
        })
        .await
    }

    pub async fn list_mine(caller: AuthUser, page: PageQuery, pool: &DbPool) -> Result<Paginated<RoomListItem>, ApiError> {
        caller.require_role(UserRole::Owner)?;

        let (items, total) = db::run(pool, move |conn| {
            let total = rooms::table
                .filter(rooms::owner_id.eq(caller.user_id))
                .count()
                .get_result::<i64>(conn)?;
            let list = rooms::table
                .filter(rooms::owner_id.eq(caller.user_id))
                .order(rooms::created_at.desc())
                .select(Room::as_select())
                .limit(page.limit())
                .offset(page.offset())
                .load::<Room>(conn)?;
            Ok((with_primary_images(conn, list)?, total))
        })
        .await?;

        Ok(Paginated::new(items, &page, total))
    }

    pub async fn create(caller: AuthUser, request: CreateRoomRequest, pool: &DbPool) -> Result<Room, ApiError> {
        caller.require_role(UserRole::Owner)?;
        let new_room = request.checked()?.into_new_room(caller.user_id)?;

        let room = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            Ok(diesel::insert_into(rooms::table)
                .values(&new_room)
                .returning(Room::as_returning())
                .get_result::<Room>(conn)?)
        })
        .await?;

        info!("Owner {} created room {}", room.owner_id, room.room_id);
        Ok(room)
    }

    pub async fn update(caller: AuthUser, id: i32, request: UpdateRoomRequest, pool: &DbPool) -> Result<Room, ApiError> {
        let changes = request.checked()?.into_changes(Utc::now().naive_utc())?;

        let room = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            owned_room(conn, id, &caller, false)?;
            Ok(diesel::update(rooms::table.find(id))
                .set(&changes)
                .returning(Room::as_returning())
                .get_result::<Room>(conn)?)
        })
        .await?;

        info!("Room {} updated", id);
        Ok(room)
    }

    pub async fn delete(caller: AuthUser, id: i32, pool: &DbPool) -> Result<(), ApiError> {
        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            owned_room(conn, id, &caller, true)?;
            diesel::delete(rooms::table.find(id))
                .execute(conn)
                .map_err(|e| match ApiError::from(e) {
                    ApiError::ValidationError(_) => {
                        ApiError::Conflict("Rooms with payment history cannot be deleted; mark the room unavailable instead".to_string())
                    },
                    other => other,
                })?;
            Ok(())
        })
        .await?;

        info!("Room {} deleted", id);
        Ok(())
    }

    pub async fn add_image(caller: AuthUser, id: i32, request: AddImageRequest, pool: &DbPool) -> Result<RoomImage, ApiError> {
        let request = request.checked()?;
        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            owned_room(conn, id, &caller, false)?;

            conn.transaction::<_, ApiError, _>(|conn| {
                let existing = room_images::table
                    .filter(room_images::room_id.eq(id))
                    .count()
                    .get_result::<i64>(conn)?;
                let primary = existing == 0 || request.is_primary.unwrap_or(false);

                if primary {
                    diesel::update(room_images::table.filter(room_images::room_id.eq(id)))
                        .set(room_images::is_primary.eq(false))
                        .execute(conn)?;
                }

                Ok(diesel::insert_into(room_images::table)
                    .values(&NewRoomImage {
                        room_id: id,
                        image_url: request.image_url,
                        is_primary: primary,
                    })
                    .returning(RoomImage::as_returning())
                    .get_result::<RoomImage>(conn)
                    .map_err(|e| ApiError::from(e).with_conflict_message(PRIMARY_RACE))?)
            })
        })
        .await
    }

    pub async fn delete_image(caller: AuthUser, id: i32, image: i32, pool: &DbPool) -> Result<(), ApiError> {
        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            owned_room(conn, id, &caller, false)?;

            conn.transaction::<_, ApiError, _>(|conn| {
                let was_primary = diesel::delete(
                    room_images::table
                        .filter(room_images::image_id.eq(image))
                        .filter(room_images::room_id.eq(id))
                )
                .returning(room_images::is_primary)
                .get_result::<bool>(conn)
                .optional()?
                .ok_or_else(|| ApiError::not_found("Image"))?;

                if was_primary {
                    let next = room_images::table
                        .filter(room_images::room_id.eq(id))
                        .order(room_images::image_id.asc())
                        .select(room_images::image_id)
                        .first::<i32>(conn)
                        .optional()?;
                    if let Some(next_id) = next {
                        diesel::update(room_images::table.find(next_id))
                            .set(room_images::is_primary.eq(true))
                            .execute(conn)?;
                    }
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn set_primary_image(caller: AuthUser, id: i32, image: i32, pool: &DbPool) -> Result<RoomImage, ApiError> {
        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            owned_room(conn, id, &caller, false)?;

            conn.transaction::<_, ApiError, _>(|conn| {
                let exists = room_images::table
                    .filter(room_images::image_id.eq(image))
                    .filter(room_images::room_id.eq(id))
                    .count()
                    .get_result::<i64>(conn)?;
                if exists == 0 {
                    return Err(ApiError::not_found("Image"));
                }

                diesel::update(room_images::table.filter(room_images::room_id.eq(id)))
                    .set(room_images::is_primary.eq(false))
                    .execute(conn)?;

                Ok(diesel::update(room_images::table.find(image))
                    .set(room_images::is_primary.eq(true))
                    .returning(RoomImage::as_returning())
                    .get_result::<RoomImage>(conn)
                    .map_err(|e| ApiError::from(e).with_conflict_message(PRIMARY_RACE))?)
            })
        })
        .await
    }

    pub async fn list_facilities(pool: &DbPool) -> Result<Vec<Facility>, ApiError> {
        db::run(pool, |conn| {
            Ok(facilities::table
                .order(facilities::name.asc())
                .select(Facility::as_select())
                .load::<Facility>(conn)?)
        })
        .await
    }

    pub async fn create_facility(caller: AuthUser, request: NewFacility, pool: &DbPool) -> Result<Facility, ApiError> {
        caller.require_admin()?;
        let request = request.checked()?;

        let facility = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            diesel::insert_into(facilities::table)
                .values(&request)
                .returning(Facility::as_returning())
                .get_result::<Facility>(conn)
                .map_err(|e| match ApiError::from(e) {
                    ApiError::Conflict(_) => ApiError::Conflict(format!("Facility '{}' already exists", request.name)),
                    other => other,
                })
        })
        .await?;

        info!("Facility {} created", facility.name);
        Ok(facility)
    }

    pub async fn delete_facility(caller: AuthUser, id: i32, pool: &DbPool) -> Result<(), ApiError> {
        caller.require_admin()?;

        let deleted = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            Ok(diesel::delete(facilities::table.find(id)).execute(conn)?)
        })
        .await?;

        if deleted == 0 {
            return Err(ApiError::not_found("Facility"));
        }
        Ok(())
    }

    /// Replaces the room's facility set.
    pub async fn set_room_facilities(
        caller: AuthUser,
        id: i32,
        request: SetFacilitiesRequest,
        pool: &DbPool,
    ) -> Result<Vec<Facility>, ApiError> {
        let wanted: Vec<i32> = request.facility_ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            owned_room(conn, id, &caller, false)?;

            conn.transaction::<_, ApiError, _>(|conn| {
                let known = facilities::table
                    .filter(facilities::facility_id.eq_any(&wanted))
                    .count()
                    .get_result::<i64>(conn)?;
                if known != wanted.len() as i64 {
                    return Err(ApiError::validation("One or more facilities do not exist"));
                }

                diesel::delete(room_facilities::table.filter(room_facilities::room_id.eq(id)))
                    .execute(conn)?;

                let rows: Vec<NewRoomFacility> = wanted
                    .iter()
                    .map(|facility| NewRoomFacility { room_id: id, facility_id: *facility })
                    .collect();
                if !rows.is_empty() {
                    diesel::insert_into(room_facilities::table)
                        .values(&rows)
                        .execute(conn)?;
                }

                Ok(facilities::table
                    .filter(facilities::facility_id.eq_any(&wanted))
                    .order(facilities::name.asc())
                    .select(Facility::as_select())
                    .load::<Facility>(conn)?)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;
    use rust_decimal_macros::dec;

    fn sql(filter: &SearchFilter) -> String {
        debug_query::<Pg, _>(&filtered_rooms(filter)).to_string()
    }

    #[test]
    fn default_search_only_shows_available_rooms() {
        let filter = SearchFilter::from(&RoomSearchQuery::default());
        let text = sql(&filter);
        assert!(text.contains("\"rooms\".\"is_available\" = $1"));
        assert!(!text.contains("ILIKE"));
    }

    #[test]
    fn search_filters_compose() {
        let query = RoomSearchQuery {
            city: Some("Bandung".into()),
            q: Some("kost".into()),
            min_price: Some(dec!(500000)),
            max_price: Some(dec!(2000000)),
            facility_id: Some(3),
            available_only: Some(false),
            ..Default::default()
        };
        let text = sql(&SearchFilter::from(&query));
        assert!(!text.contains("\"rooms\".\"is_available\" ="));
        assert!(text.contains("\"rooms\".\"city\" ILIKE"));
        assert!(text.contains("\"rooms\".\"price_per_month\" >="));
        assert!(text.contains("\"rooms\".\"price_per_month\" <="));
        assert!(text.contains("\"room_facilities\""));
    }
}
