use lazy_static::lazy_static;
use regex::Regex;

use super::{
    dto::{RegisterRequest, TokenPair},
    jwt::JwtKeys,
};
use crate::{
    db::User,
    error::{ApiError, FieldErrors},
    mail::OutgoingMail,
};

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 150;

const REQUIRED: &str = "This field is required.";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A registration payload that passed validation.
#[derive(Debug)]
pub(crate) struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

pub(crate) fn validate_registration(req: RegisterRequest) -> Result<Registration, ApiError> {
    let mut errors = FieldErrors::new();

    let email = normalize_email(req.email.as_deref().unwrap_or_default());
    if email.is_empty() {
        errors.entry("email").or_default().push(REQUIRED.into());
    } else if !is_valid_email(&email) {
        errors
            .entry("email")
            .or_default()
            .push("Enter a valid email address.".into());
    }

    let password = req.password.unwrap_or_default();
    if password.trim().is_empty() {
        errors.entry("password").or_default().push(REQUIRED.into());
    }

    let first_name = req.first_name.unwrap_or_default().trim().to_string();
    let last_name = req.last_name.unwrap_or_default().trim().to_string();
    for (field, value) in [("first_name", &first_name), ("last_name", &last_name)] {
        if value.chars().count() > MAX_NAME_LEN {
            errors.entry(field).or_default().push(format!(
                "Ensure this field has no more than {MAX_NAME_LEN} characters."
            ));
        }
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok(Registration {
        email,
        password,
        first_name,
        last_name,
    })
}

/// Collects `This field is required.` for each blank field, in one error.
pub(crate) fn require_fields<const N: usize>(
    fields: [(&'static str, Option<&str>); N],
) -> Result<[String; N], ApiError> {
    let mut errors = FieldErrors::new();
    let values = fields.map(|(name, value)| match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => {
            errors.insert(name, vec![REQUIRED.into()]);
            String::new()
        }
    });
    if errors.is_empty() {
        Ok(values)
    } else {
        Err(ApiError::Validation(errors))
    }
}

pub(crate) fn issue_pair(keys: &JwtKeys, user_id: i64) -> anyhow::Result<TokenPair> {
    Ok(TokenPair {
        access: keys.sign_access(user_id)?,
        refresh: keys.sign_refresh(user_id)?,
    })
}

pub(crate) fn welcome_mail(user: &User) -> OutgoingMail {
    let greeting = if user.first_name.is_empty() {
        "Hi".to_string()
    } else {
        format!("Hi {}", user.first_name)
    };
    OutgoingMail {
        to: user.email.clone(),
        subject: "Welcome to SmartPay".into(),
        body: format!(
            "{greeting},\n\nYour SmartPay account for {} is ready. \
             Sign in any time to split bills and track payments.\n",
            user.email
        ),
    }
}
