use serde_json::Value;

use super::dto::UpdateProfileRequest;
use crate::{
    db::UserProfile,
    error::{ApiError, FieldErrors},
};

const MAX_AVATAR_LEN: usize = 100;

/// Avatars are paths relative to the media root.
fn avatar_error(path: &str) -> Option<String> {
    if path.chars().count() > MAX_AVATAR_LEN {
        return Some(format!(
            "Ensure this field has no more than {MAX_AVATAR_LEN} characters."
        ));
    }
    if path.starts_with('/') || path.split(['/', '\\']).any(|seg| seg == "..") {
        return Some("Avatar must be a relative path inside the media folder.".into());
    }
    None
}

/// Applies a PATCH body to `profile`, or returns every field error found.
pub(crate) fn apply_update(
    profile: &mut UserProfile,
    req: UpdateProfileRequest,
) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();

    let avatar = match req.avatar {
        Some(Some(path)) => {
            let path = path.trim().to_string();
            if path.is_empty() {
                Some(None)
            } else {
                if let Some(msg) = avatar_error(&path) {
                    errors.entry("avatar").or_default().push(msg);
                }
                Some(Some(path))
            }
        }
        other => other,
    };

    if let Some(prefs) = &req.preferences {
        if !matches!(prefs, Value::Object(_)) {
            errors
                .entry("preferences")
                .or_default()
                .push("Preferences must be a JSON object.".into());
        }
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    if let Some(avatar) = avatar {
        profile.avatar = avatar;
    }
    if let Some(prefs) = req.preferences {
        profile.preferences.0 = prefs;
    }
    Ok(())
}
