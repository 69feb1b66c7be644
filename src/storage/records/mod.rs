pub mod auth;
pub mod user;

pub(crate) use auth::{AccessTokenRecord, RefreshTokenRecord};
pub(crate) use user::UserRecord;
