//! services/client/src/adapters/pg_auth.rs
//!
//! Email/password authentication against the `accounts` table, implementing the
//! `AuthProvider` port. The signed-in session lives in this process and is published
//! through a `watch` channel; passwords are hashed with argon2.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_stream::stream;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use study_sync_core::domain::Session;
use study_sync_core::ports::{AuthProvider, PortError, PortResult, SessionStream};
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use super::pg_store::port_error;

const MIN_PASSWORD_CHARS: usize = 6;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

pub struct PgAuthProvider {
    pool: PgPool,
    session: watch::Sender<Option<Session>>,
    last_authenticated: Mutex<Option<Instant>>,
    recent_login_window: Duration,
}

impl PgAuthProvider {
    /// Creates a new `PgAuthProvider` with no signed-in user.
    pub fn new(pool: PgPool, recent_login_window: Duration) -> Self {
        let (session, _) = watch::channel(None);
        Self { pool, session, last_authenticated: Mutex::new(None), recent_login_window }
    }

    fn mark_authenticated(&self, at: Option<Instant>) {
        if let Ok(mut last) = self.last_authenticated.lock() {
            *last = at;
        }
    }

    fn require_recent_login(&self) -> PortResult<()> {
        let recent = self
            .last_authenticated
            .lock()
            .ok()
            .and_then(|last| *last)
            .map(|at| at.elapsed() <= self.recent_login_window)
            .unwrap_or(false);
        if recent {
            Ok(())
        } else {
            Err(PortError::RequiresRecentLogin)
        }
    }

    fn current_user_id(&self) -> PortResult<Uuid> {
        let session = self.session.borrow().clone().ok_or(PortError::Unauthorized)?;
        Uuid::parse_str(&session.id).map_err(|e| PortError::Unexpected(e.to_string()))
    }

    async fn account_by_id(&self, user_id: Uuid) -> PortResult<AccountRecord> {
        sqlx::query_as::<_, AccountRecord>(
            "SELECT user_id, email, display_name, hashed_password FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Account {} not found", user_id)),
            _ => port_error(e),
        })
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AccountRecord {
    user_id: Uuid,
    email: String,
    display_name: Option<String>,
    hashed_password: String,
}

impl AccountRecord {
    fn to_session(&self) -> Session {
        Session {
            id: self.user_id.to_string(),
            display_name: self.display_name.clone(),
            email: Some(self.email.clone()),
        }
    }
}

fn hash_password(password: &str) -> PortResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            PortError::Unexpected("Failed to hash password".to_string())
        })
}

fn verify_password(password: &str, hashed: &str) -> PortResult<()> {
    let parsed = PasswordHash::new(hashed).map_err(|e| PortError::Unexpected(e.to_string()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| PortError::InvalidCredentials)
}

fn check_strength(password: &str) -> PortResult<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(PortError::WeakPassword);
    }
    Ok(())
}

fn unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
        .unwrap_or(false)
}

//=========================================================================================
// `AuthProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthProvider for PgAuthProvider {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Session> {
        let account = sqlx::query_as::<_, AccountRecord>(
            "SELECT user_id, email, display_name, hashed_password FROM accounts WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_error)?
        .ok_or(PortError::InvalidCredentials)?;

        verify_password(password, &account.hashed_password)?;

        let session = account.to_session();
        self.mark_authenticated(Some(Instant::now()));
        self.session.send_replace(Some(session.clone()));
        info!("User {} signed in.", session.id);
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Session> {
        check_strength(password)?;
        let hashed_password = hash_password(password)?;

        let account = sqlx::query_as::<_, AccountRecord>(
            "INSERT INTO accounts (user_id, email, hashed_password) VALUES ($1, $2, $3)
             RETURNING user_id, email, display_name, hashed_password",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(&hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| if unique_violation(&e) { PortError::EmailInUse } else { port_error(e) })?;

        let session = account.to_session();
        self.mark_authenticated(Some(Instant::now()));
        self.session.send_replace(Some(session.clone()));
        info!("User {} signed up.", session.id);
        Ok(session)
    }

    async fn sign_out(&self) -> PortResult<()> {
        self.mark_authenticated(None);
        self.session.send_replace(None);
        Ok(())
    }

    fn session_changes(&self) -> SessionStream {
        let mut rx = self.session.subscribe();
        Box::pin(stream! {
            let current = rx.borrow_and_update().clone();
            yield current;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        })
    }

    async fn reauthenticate(&self, password: &str) -> PortResult<()> {
        let account = self.account_by_id(self.current_user_id()?).await?;
        verify_password(password, &account.hashed_password)?;
        self.mark_authenticated(Some(Instant::now()));
        Ok(())
    }

    async fn update_email(&self, new_email: &str) -> PortResult<()> {
        let user_id = self.current_user_id()?;
        self.require_recent_login()?;
        let account = sqlx::query_as::<_, AccountRecord>(
            "UPDATE accounts SET email = $1 WHERE user_id = $2
             RETURNING user_id, email, display_name, hashed_password",
        )
        .bind(new_email)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| if unique_violation(&e) { PortError::EmailInUse } else { port_error(e) })?;
        self.session.send_replace(Some(account.to_session()));
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> PortResult<()> {
        check_strength(new_password)?;
        let user_id = self.current_user_id()?;
        self.require_recent_login()?;
        let hashed_password = hash_password(new_password)?;
        sqlx::query("UPDATE accounts SET hashed_password = $1 WHERE user_id = $2")
            .bind(&hashed_password)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(port_error)?;
        Ok(())
    }
}
