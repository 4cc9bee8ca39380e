use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::{ProfileListing, ProfilePage};

pub(crate) const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    MAX_PAGE_SIZE
}

impl ProfileQuery {
    pub fn page(&self) -> (i64, i64) {
        (self.limit.clamp(1, MAX_PAGE_SIZE), self.offset.max(0))
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileRow {
    pub id: i64,
    pub user_id: i64,
    /// Owner email.
    pub user: String,
    pub label: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<ProfileListing> for ProfileRow {
    fn from(row: ProfileListing) -> Self {
        Self {
            label: row.to_string(),
            id: row.id,
            user_id: row.user_id,
            user: row.user_email,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileListResponse {
    pub count: i64,
    pub results: Vec<ProfileRow>,
}

impl From<ProfilePage> for ProfileListResponse {
    fn from(page: ProfilePage) -> Self {
        Self {
            count: page.count,
            results: page.results.into_iter().map(ProfileRow::from).collect(),
        }
    }
}
