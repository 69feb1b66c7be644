use crate::domain::user::User;
use crate::error::{AppError, Result};
use crate::services::auth_service::AuthService;
use crate::storage::UserStore;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct UserService {
    users: Arc<dyn UserStore>,
    auth_service: AuthService,
}

impl UserService {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, auth_service: AuthService) -> Self {
        Self { users, auth_service }
    }

    /// Provisions an account with an Argon2-hashed password.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` for empty fields and `AppError::Conflict` if the name is taken.
    #[tracing::instrument(skip(self, password), fields(user_id = tracing::field::Empty), err(level = "warn"))]
    pub async fn create_user(&self, username: &str, password: &str) -> Result<User> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AppError::BadRequest("Username and password are required".into()));
        }

        if self.users.find_by_username(username).await?.is_some() {
            return Err(AppError::Conflict("Username already exists".into()));
        }

        let password_hash = self.auth_service.hash_password(password).await?;
        let user = self.users.create(username, &password_hash).await?;

        tracing::Span::current().record("user_id", user.id);
        tracing::info!("User created");
        Ok(user)
    }

    /// # Errors
    /// Returns `AppError::NotFound` if no such user exists.
    pub async fn get_user(&self, id: i64) -> Result<User> {
        self.users.find_by_id(id).await?.ok_or(AppError::NotFound)
    }
}
