use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::db::UserProfile;

/// PATCH body for the caller's profile.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    /// `Some(Some(path))` sets, `Some(None)` clears, `None` leaves as is.
    #[serde(default, deserialize_with = "present")]
    pub avatar: Option<Option<String>>,
    pub preferences: Option<Value>,
}

/// Keeps an explicit `null` apart from a missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: i64,
    pub user_id: i64,
    pub avatar: Option<String>,
    pub preferences: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<UserProfile> for ProfileResponse {
    fn from(p: UserProfile) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            avatar: p.avatar,
            preferences: p.preferences.0,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}
