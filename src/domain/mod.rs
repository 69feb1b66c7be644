pub mod auth;
pub mod auth_session;
pub mod clock;
pub mod token;
pub mod user;
