use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::ApiError;

/// Declares a string-backed enum stored in a VARCHAR column.
macro_rules! db_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant
            ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::errors::ApiError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::errors::ApiError::validation(
                        format!("Invalid {} value: {}", stringify!($name), other)
                    )),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod user;
pub mod room;
pub mod appointment;
pub mod message;
pub mod payment;
pub mod review;
pub mod report;

pub use user::*;
pub use room::*;
pub use appointment::*;
pub use message::*;
pub use payment::*;
pub use review::*;
pub use report::*;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

/// Page parameters shared by every list endpoint.
#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE)
    }

    pub fn limit(&self) -> i64 {
        self.per_page
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PER_PAGE)
            .min(MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }
}

/// Request bodies checked at the service boundary. Text is trimmed before the length rules
/// run, so padding cannot satisfy a minimum.
pub trait Checked: Validate + Sized {
    fn trimmed(self) -> Self {
        self
    }

    fn checked(self) -> Result<Self, ApiError> {
        let request = self.trimmed();
        request.validate()?;
        Ok(request)
    }
}

fn trim_opt(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

#[derive(Serialize, Debug)]
pub struct PageMeta {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Serialize, Debug)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, query: &PageQuery, total: i64) -> Self {
        let per_page = query.limit();
        let total_pages = if total == 0 { 0 } else { (total + per_page - 1) / per_page };

        Self {
            data,
            meta: PageMeta {
                page: query.page(),
                per_page,
                total,
                total_pages,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_page_saturates_instead_of_overflowing() {
        let query = PageQuery { page: Some(i64::MAX), per_page: Some(100) };
        assert_eq!(query.offset(), i64::MAX);
        let query = PageQuery { page: Some(3), per_page: Some(10) };
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn page_query_defaults() {
        let query = PageQuery::default();
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), DEFAULT_PER_PAGE);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn page_query_caps_and_sanitizes() {
        let query = PageQuery { page: Some(0), per_page: Some(1000) };
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), MAX_PER_PAGE);

        let query = PageQuery { page: Some(3), per_page: Some(10) };
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn paginated_meta_rounds_pages_up() {
        let query = PageQuery { page: Some(2), per_page: Some(10) };
        let page = Paginated::new(vec![1, 2, 3], &query, 21);
        assert_eq!(page.meta.total_pages, 3);
        assert_eq!(page.meta.page, 2);

        let empty: Paginated<i32> = Paginated::new(vec![], &query, 0);
        assert_eq!(empty.meta.total_pages, 0);
    }
}
