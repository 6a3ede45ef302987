use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use model::{Identity, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The authenticated caller, taken from the headers set by the upstream
/// authentication layer. A missing role means buyer.
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| ApiError::MissingIdentity(format!("{USER_ID_HEADER} header is required")))?;
        let role = match header(parts, USER_ROLE_HEADER) {
            Some(raw) => raw
                .parse::<Role>()
                .map_err(|_| ApiError::MissingIdentity(format!("unknown role '{raw}'")))?,
            None => Role::Buyer,
        };

        let mut identity = Identity::new(user_id, role);
        if let Some(email) = header(parts, USER_EMAIL_HEADER) {
            identity = identity.with_email(email);
        }
        Ok(Caller(identity))
    }
}
