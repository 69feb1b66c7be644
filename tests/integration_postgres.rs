use bookmarker_server::domain::auth::{NewToken, hash_token};
use bookmarker_server::error::AppError;
use bookmarker_server::storage::refresh_token_repo::RefreshTokenRepository;
use bookmarker_server::storage::session_repo::SessionRepository;
use bookmarker_server::storage::token_repo::TokenRepository;
use bookmarker_server::storage::user_repo::UserRepository;
use bookmarker_server::storage::{AccessTokenStore, DbPool, RefreshTokenStore, SessionStore, UserStore};
use reqwest::StatusCode;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

mod common;

fn unique_hash() -> String {
    hash_token(&Uuid::now_v7().to_string())
}

fn new_token(user_id: i64, hash: &str, expires_at: OffsetDateTime) -> NewToken<'_> {
    NewToken { user_id, token_hash: hash, created_at: OffsetDateTime::now_utc(), expires_at }
}

async fn seed_user(pool: &DbPool) -> i64 {
    UserRepository::new(pool.clone()).create(&common::unique_username(), "hash").await.unwrap().id
}

#[tokio::test]
async fn test_token_rows_round_trip_and_delete_once() {
    let pool = common::get_test_pool().await;
    let user_id = seed_user(&pool).await;
    let repo = TokenRepository::new(pool);
    let hash = unique_hash();
    let expires_at = OffsetDateTime::now_utc() + time::Duration::minutes(30);

    let created = repo.create(new_token(user_id, &hash, expires_at)).await.unwrap();
    let found = repo.find_by_hash(&hash).await.unwrap().expect("row should exist");
    assert_eq!(found.id, created.id);
    assert_eq!(found.user_id, user_id);

    let duplicate = repo.create(new_token(user_id, &hash, expires_at)).await;
    assert!(matches!(duplicate, Err(AppError::DuplicateToken)));

    assert!(repo.delete(&hash).await.unwrap());
    assert!(!repo.delete(&hash).await.unwrap());
    assert!(repo.find_by_hash(&hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_refresh_deletes_have_single_winner() {
    let pool = common::get_test_pool().await;
    let user_id = seed_user(&pool).await;
    let repo = RefreshTokenRepository::new(pool);
    let hash = unique_hash();

    repo.create(new_token(user_id, &hash, OffsetDateTime::now_utc() + time::Duration::days(30))).await.unwrap();

    let results = futures::future::join_all((0..8).map(|_| repo.delete(&hash))).await;
    let winners = results.into_iter().map(Result::unwrap).filter(|removed| *removed).count();

    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_duplicate_username_is_conflict() {
    let pool = common::get_test_pool().await;
    let repo = UserRepository::new(pool);
    let username = common::unique_username();

    let user = repo.create(&username, "hash").await.unwrap();
    assert!(matches!(repo.create(&username, "other").await, Err(AppError::Conflict(_))));

    assert_eq!(repo.find_by_username(&username).await.unwrap().map(|u| u.id), Some(user.id));
    assert_eq!(repo.find_by_id(user.id).await.unwrap().map(|u| u.username), Some(username));
}

#[tokio::test]
async fn test_delete_expired_spares_live_rows() {
    let pool = common::get_test_pool().await;
    let user_id = seed_user(&pool).await;
    let repo = RefreshTokenRepository::new(pool);
    let now = OffsetDateTime::now_utc();
    let (stale, live) = (unique_hash(), unique_hash());

    repo.create(new_token(user_id, &stale, now - time::Duration::minutes(1))).await.unwrap();
    repo.create(new_token(user_id, &live, now + time::Duration::minutes(1))).await.unwrap();

    assert!(repo.delete_expired(now).await.unwrap() >= 1);
    assert!(repo.find_by_hash(&stale).await.unwrap().is_none());
    assert!(repo.find_by_hash(&live).await.unwrap().is_some());
}

#[tokio::test]
async fn test_issue_rolls_back_access_row_on_refresh_conflict() {
    let pool = common::get_test_pool().await;
    let user_id = seed_user(&pool).await;
    let sessions = SessionRepository::new(pool.clone());
    let access = TokenRepository::new(pool.clone());
    let refresh = RefreshTokenRepository::new(pool);
    let expires_at = OffsetDateTime::now_utc() + time::Duration::days(1);

    let taken = unique_hash();
    refresh.create(new_token(user_id, &taken, expires_at)).await.unwrap();

    let access_hash = unique_hash();
    let result = sessions.issue(new_token(user_id, &access_hash, expires_at), new_token(user_id, &taken, expires_at)).await;

    assert!(matches!(result, Err(AppError::DuplicateToken)));
    assert!(access.find_by_hash(&access_hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rotate_rolls_back_consumption_on_failure() {
    let pool = common::get_test_pool().await;
    let user_id = seed_user(&pool).await;
    let sessions = SessionRepository::new(pool.clone());
    let access = TokenRepository::new(pool.clone());
    let refresh = RefreshTokenRepository::new(pool);
    let expires_at = OffsetDateTime::now_utc() + time::Duration::days(1);

    let old_hash = unique_hash();
    let consumed = refresh.create(new_token(user_id, &old_hash, expires_at)).await.unwrap();
    let taken = unique_hash();
    access.create(new_token(user_id, &taken, expires_at)).await.unwrap();

    let new_refresh = unique_hash();
    let result =
        sessions.rotate(&consumed, new_token(user_id, &taken, expires_at), new_token(user_id, &new_refresh, expires_at)).await;

    assert!(matches!(result, Err(AppError::DuplicateToken)));
    assert!(refresh.find_by_hash(&old_hash).await.unwrap().is_some());
    assert!(refresh.find_by_hash(&new_refresh).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rotate_of_consumed_token_inserts_nothing() {
    let pool = common::get_test_pool().await;
    let user_id = seed_user(&pool).await;
    let sessions = SessionRepository::new(pool.clone());
    let access = TokenRepository::new(pool.clone());
    let refresh = RefreshTokenRepository::new(pool);
    let expires_at = OffsetDateTime::now_utc() + time::Duration::days(1);

    let old_hash = unique_hash();
    let consumed = refresh.create(new_token(user_id, &old_hash, expires_at)).await.unwrap();
    refresh.delete(&old_hash).await.unwrap();

    let (access_hash, refresh_hash) = (unique_hash(), unique_hash());
    let result = sessions
        .rotate(&consumed, new_token(user_id, &access_hash, expires_at), new_token(user_id, &refresh_hash, expires_at))
        .await
        .unwrap();

    assert!(result.is_none());
    assert!(access.find_by_hash(&access_hash).await.unwrap().is_none());
    assert!(refresh.find_by_hash(&refresh_hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_lifecycle_over_postgres() {
    let app = common::TestApp::spawn_postgres().await;
    let session = app.login().await;

    let resp = app.me(&session.access_token).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["user"]["username"], app.username);

    let resp = app.refresh(&session.refresh_token).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let rotated: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(app.refresh(&session.refresh_token).await.status(), StatusCode::UNAUTHORIZED);

    let payload = json!({
        "access_token": rotated["access_token"],
        "refresh_token": rotated["refresh_token"],
    });
    let resp = app.client.post(format!("{}/v1/logout", app.server_url)).json(&payload).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(app.me(rotated["access_token"].as_str().unwrap()).await.status(), StatusCode::UNAUTHORIZED);
}
