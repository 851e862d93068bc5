use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use validator::Validate;

use crate::errors::ApiError;
use super::{trim_opt, Checked, PageQuery, PublicUser, RatingSummary};

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::rooms)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Room {
    pub room_id: i32,
    pub owner_id: i32,
    pub title: String,
    pub description: String,
    pub address: String,
    pub city: String,
    pub price_per_month: Decimal,
    pub size_sqm: Option<i32>,
    pub capacity: i32,
    pub is_available: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::rooms)]
pub struct NewRoom {
    pub owner_id: i32,
    pub title: String,
    pub description: String,
    pub address: String,
    pub city: String,
    pub price_per_month: Decimal,
    pub size_sqm: Option<i32>,
    pub capacity: i32,
    pub is_available: bool,
}

#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::rooms)]
pub struct RoomChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub price_per_month: Option<Decimal>,
    pub size_sqm: Option<i32>,
    pub capacity: Option<i32>,
    pub is_available: Option<bool>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::room_images)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RoomImage {
    pub image_id: i32,
    pub room_id: i32,
    pub image_url: String,
    pub is_primary: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::room_images)]
pub struct NewRoomImage {
    pub room_id: i32,
    pub image_url: String,
    pub is_primary: bool,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::facilities)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Facility {
    pub facility_id: i32,
    pub name: String,
    pub icon: Option<String>,
}

#[derive(Insertable, Deserialize, Validate, Debug)]
#[diesel(table_name = crate::schema::facilities)]
pub struct NewFacility {
    #[validate(length(min = 1, max = 100, message = "Facility name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(length(max = 100, message = "Icon name is too long"))]
    pub icon: Option<String>,
}

impl Checked for NewFacility {
    fn trimmed(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.icon = trim_opt(self.icon);
        self
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::room_facilities)]
pub struct NewRoomFacility {
    pub room_id: i32,
    pub facility_id: i32,
}

// DTOs
#[derive(Deserialize, Validate, Debug)]
pub struct CreateRoomRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be between 3 and 200 characters"))]
    pub title: String,
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: Option<String>,
    #[validate(length(min = 5, max = 500, message = "Address must be between 5 and 500 characters"))]
    pub address: String,
    #[validate(length(min = 2, max = 120, message = "City must be between 2 and 120 characters"))]
    pub city: String,
    pub price_per_month: Decimal,
    #[validate(range(min = 1, max = 10000, message = "Size must be a positive number of square meters"))]
    pub size_sqm: Option<i32>,
    #[validate(range(min = 1, max = 50, message = "Capacity must be between 1 and 50"))]
    pub capacity: Option<i32>,
    pub is_available: Option<bool>,
}

impl Checked for CreateRoomRequest {
    fn trimmed(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.description = trim_opt(self.description);
        self.address = self.address.trim().to_string();
        self.city = self.city.trim().to_string();
        self
    }
}

impl CreateRoomRequest {
    pub fn into_new_room(self, owner_id: i32) -> Result<NewRoom, ApiError> {
        validate_price(self.price_per_month)?;
        Ok(NewRoom {
            owner_id,
            title: self.title,
            description: self.description.unwrap_or_default(),
            address: self.address,
            city: self.city,
            price_per_month: self.price_per_month,
            size_sqm: self.size_sqm,
            capacity: self.capacity.unwrap_or(1),
            is_available: self.is_available.unwrap_or(true),
        })
    }
}

#[derive(Deserialize, Validate, Debug)]
pub struct UpdateRoomRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be between 3 and 200 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: Option<String>,
    #[validate(length(min = 5, max = 500, message = "Address must be between 5 and 500 characters"))]
    pub address: Option<String>,
    #[validate(length(min = 2, max = 120, message = "City must be between 2 and 120 characters"))]
    pub city: Option<String>,
    pub price_per_month: Option<Decimal>,
    #[validate(range(min = 1, max = 10000, message = "Size must be a positive number of square meters"))]
    pub size_sqm: Option<i32>,
    #[validate(range(min = 1, max = 50, message = "Capacity must be between 1 and 50"))]
    pub capacity: Option<i32>,
    pub is_available: Option<bool>,
}

impl Checked for UpdateRoomRequest {
    fn trimmed(mut self) -> Self {
        self.title = trim_opt(self.title);
        self.description = trim_opt(self.description);
        self.address = trim_opt(self.address);
        self.city = trim_opt(self.city);
        self
    }
}

impl UpdateRoomRequest {
    pub fn into_changes(self, now: NaiveDateTime) -> Result<RoomChanges, ApiError> {
        if let Some(price) = self.price_per_month {
            validate_price(price)?;
        }
        Ok(RoomChanges {
            title: self.title,
            description: self.description,
            address: self.address,
            city: self.city,
            price_per_month: self.price_per_month,
            size_sqm: self.size_sqm,
            capacity: self.capacity,
            is_available: self.is_available,
            updated_at: Some(now),
        })
    }
}

pub fn validate_price(price: Decimal) -> Result<(), ApiError> {
    if price <= Decimal::ZERO {
        return Err(ApiError::validation("Price must be greater than zero"));
    }
    if price.scale() > 2 {
        return Err(ApiError::validation("Price may have at most two decimal places"));
    }
    Ok(())
}

#[derive(Deserialize, Validate, Debug)]
pub struct AddImageRequest {
    #[validate(url(message = "Image must be a URL"))]
    pub image_url: String,
    pub is_primary: Option<bool>,
}

impl Checked for AddImageRequest {
    fn trimmed(mut self) -> Self {
        self.image_url = self.image_url.trim().to_string();
        self
    }
}

#[derive(Deserialize, Debug)]
pub struct SetFacilitiesRequest {
    pub facility_ids: Vec<i32>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
}

#[derive(Deserialize, Debug, Default)]
pub struct RoomSearchQuery {
    pub city: Option<String>,
    pub q: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub facility_id: Option<i32>,
    pub available_only: Option<bool>,
    pub sort: Option<RoomSort>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl RoomSearchQuery {
    pub fn validate_range(&self) -> Result<(), ApiError> {
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(ApiError::validation("min_price must not exceed max_price"));
            }
        }
        Ok(())
    }

    pub fn page_query(&self) -> PageQuery {
        PageQuery { page: self.page, per_page: self.per_page }
    }

    pub fn city_pattern(&self) -> Option<String> {
        self.city.as_deref().map(str::trim).filter(|c| !c.is_empty()).map(like_pattern)
    }

    pub fn text_pattern(&self) -> Option<String> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()).map(like_pattern)
    }
}

/// Builds an ILIKE pattern, escaping the wildcard characters in user input.
pub fn like_pattern(input: &str) -> String {
    let escaped = input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(Serialize, Debug)]
pub struct RoomListItem {
    #[serde(flatten)]
    pub room: Room,
    pub primary_image: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: Room,
    pub owner: PublicUser,
    pub images: Vec<RoomImage>,
    pub facilities: Vec<Facility>,
    pub rating: RatingSummary,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct BookmarkState {
    pub bookmarked: bool,
}

impl BookmarkState {
    /// A toggle that removed an existing row ends the bookmark; one that removed nothing creates it.
    pub fn after_toggle(removed: usize) -> Self {
        BookmarkState { bookmarked: removed == 0 }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::bookmarks)]
pub struct NewBookmark {
    pub user_id: i32,
    pub room_id: i32,
}

#[derive(Serialize, Debug)]
pub struct BookmarkedRoom {
    pub bookmarked_at: NaiveDateTime,
    #[serde(flatten)]
    pub room: RoomListItem,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_request(price: Decimal) -> CreateRoomRequest {
        CreateRoomRequest {
            title: "  Cozy room near campus ".into(),
            description: None,
            address: "Jl. Merdeka 10".into(),
            city: "Bandung".into(),
            price_per_month: price,
            size_sqm: Some(12),
            capacity: None,
            is_available: None,
        }
    }

    #[test]
    fn price_must_be_positive_with_two_decimals() {
        assert!(validate_price(dec!(1500000)).is_ok());
        assert!(validate_price(dec!(1500000.50)).is_ok());
        assert!(validate_price(dec!(0)).is_err());
        assert!(validate_price(dec!(-10)).is_err());
        assert!(validate_price(dec!(10.001)).is_err());
    }

    #[test]
    fn create_request_applies_defaults_and_trims() {
        let room = create_request(dec!(1200000)).checked().unwrap().into_new_room(7).unwrap();
        assert_eq!(room.owner_id, 7);
        assert_eq!(room.title, "Cozy room near campus");
        assert_eq!(room.capacity, 1);
        assert!(room.is_available);
        assert_eq!(room.description, "");
    }

    #[test]
    fn create_request_rejects_bad_price() {
        assert!(create_request(dec!(0)).into_new_room(7).is_err());
    }

    #[test]
    fn search_rejects_inverted_price_range() {
        let query = RoomSearchQuery {
            min_price: Some(dec!(2000000)),
            max_price: Some(dec!(1000000)),
            ..Default::default()
        };
        assert!(query.validate_range().is_err());

        let query = RoomSearchQuery {
            min_price: Some(dec!(1000000)),
            max_price: Some(dec!(1000000)),
            ..Default::default()
        };
        assert!(query.validate_range().is_ok());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("bandung"), "%bandung%");
        assert_eq!(like_pattern("100%_off"), "%100\\%\\_off%");
    }

    #[test]
    fn blank_filters_are_ignored() {
        let query = RoomSearchQuery { city: Some("   ".into()), q: Some("kost".into()), ..Default::default() };
        assert_eq!(query.city_pattern(), None);
        assert_eq!(query.text_pattern().as_deref(), Some("%kost%"));
    }

    #[test]
    fn sort_parses_snake_case() {
        let sort: RoomSort = serde_json::from_str("\"price_desc\"").unwrap();
        assert_eq!(sort, RoomSort::PriceDesc);
        assert_eq!(RoomSort::default(), RoomSort::Newest);
    }
}
