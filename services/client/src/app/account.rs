//! services/client/src/app/account.rs
//!
//! Account and profile-editing flows: sign-in and sign-up, password and email
//! changes with a single re-authentication retry, and the small profile edits the
//! profile screen offers.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use study_sync_core::domain::{ProfilePatch, Session, StudyGoal};
use study_sync_core::ports::{AuthProvider, PortError, PortResult};
use tracing::{error, info};

use crate::sync::{ProfileSync, SyncError};

/// Minimum password length accepted before calling the provider.
pub const MIN_PASSWORD_CHARS: usize = 6;
/// Delay between a successful password change and the automatic sign-out.
pub const SIGN_OUT_DELAY: Duration = Duration::from_secs(2);

/// Supplies the current password when the provider asks for a fresh sign-in.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// `None` means the user declined.
    async fn current_password(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("New passwords do not match.")]
    PasswordMismatch,

    #[error("Password should be at least 6 characters.")]
    PasswordTooShort,

    #[error("The new email is the same as the current one.")]
    SameEmail,

    #[error("Re-authentication is required to continue.")]
    ReauthDeclined,

    #[error("{0}")]
    Port(#[from] PortError),

    #[error("{0}")]
    Sync(#[from] SyncError),
}

pub struct AccountFlows {
    auth: Arc<dyn AuthProvider>,
    profile: Arc<ProfileSync>,
    sign_out_delay: Duration,
}

impl AccountFlows {
    pub fn new(auth: Arc<dyn AuthProvider>, profile: Arc<ProfileSync>) -> Self {
        Self { auth, profile, sign_out_delay: SIGN_OUT_DELAY }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AccountError> {
        Ok(self.auth.sign_in(email.trim(), password).await?)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AccountError> {
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AccountError::PasswordTooShort);
        }
        Ok(self.auth.sign_up(email.trim(), password).await?)
    }

    pub async fn sign_out(&self) -> Result<(), AccountError> {
        self.auth.sign_out().await.map_err(|e| {
            error!("Error signing out: {}", e);
            AccountError::from(e)
        })
    }

    /// Runs a sensitive mutation; if the provider demands a recent sign-in, asks
    /// `prompt` for the password, re-authenticates and retries exactly once.
    async fn with_recent_login<F, Fut>(
        &self,
        prompt: &dyn CredentialPrompt,
        mutation: F,
    ) -> Result<(), AccountError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PortResult<()>>,
    {
        match mutation().await {
            Err(PortError::RequiresRecentLogin) => {
                info!("Provider requires a recent sign-in; re-authenticating.");
                let password = prompt.current_password().await.ok_or(AccountError::ReauthDeclined)?;
                self.auth.reauthenticate(&password).await?;
                Ok(mutation().await?)
            }
            result => Ok(result?),
        }
    }

    /// Changes the password, then signs the user out after a short delay.
    pub async fn change_password(
        &self,
        new_password: &str,
        confirmation: &str,
        prompt: &dyn CredentialPrompt,
    ) -> Result<(), AccountError> {
        if new_password != confirmation {
            return Err(AccountError::PasswordMismatch);
        }
        if new_password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AccountError::PasswordTooShort);
        }
        let auth = self.auth.as_ref();
        self.with_recent_login(prompt, move || auth.update_password(new_password)).await?;
        info!("Password updated; signing out in {:?}.", self.sign_out_delay);

        let auth = Arc::clone(&self.auth);
        let delay = self.sign_out_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = auth.sign_out().await {
                error!("Error signing out after password change: {}", e);
            }
        });
        Ok(())
    }

    /// Changes the sign-in email and mirrors it into the profile.
    pub async fn change_email(
        &self,
        new_email: &str,
        prompt: &dyn CredentialPrompt,
    ) -> Result<(), AccountError> {
        let new_email = new_email.trim();
        if new_email.eq_ignore_ascii_case(self.profile.current().email.trim()) {
            return Err(AccountError::SameEmail);
        }
        let auth = self.auth.as_ref();
        self.with_recent_login(prompt, move || auth.update_email(new_email)).await?;
        self.profile.update(ProfilePatch::email(new_email)).await?;
        Ok(())
    }

    /// Renames the user. Returns `false` when there was nothing to change.
    pub async fn rename(&self, name: &str) -> Result<bool, AccountError> {
        let name = name.trim();
        if name.is_empty() || name == self.profile.current().display_name {
            return Ok(false);
        }
        self.profile.update(ProfilePatch::display_name(name)).await?;
        Ok(true)
    }

    /// Flips one goal and returns the resulting goal set.
    pub async fn toggle_goal(&self, goal: StudyGoal) -> Result<Vec<String>, AccountError> {
        let current = self.profile.current().goals;
        let selected = |g: StudyGoal| current.iter().any(|label| label == g.label());
        let goals: Vec<String> = StudyGoal::ALL
            .into_iter()
            .filter(|g| if *g == goal { !selected(*g) } else { selected(*g) })
            .map(|g| g.label().to_string())
            .collect();
        self.profile.update(ProfilePatch::goals(goals.clone())).await?;
        Ok(goals)
    }

    pub async fn set_region(&self, region: &str) -> Result<(), AccountError> {
        Ok(self.profile.update(ProfilePatch::region(region.trim())).await?)
    }

    pub async fn set_education_level(&self, level: &str) -> Result<(), AccountError> {
        Ok(self.profile.update(ProfilePatch::education_level(level.trim())).await?)
    }

    /// Replaces the subject set with the given names, trimmed and de-duplicated.
    pub async fn set_subjects<'s>(
        &self,
        subjects: impl IntoIterator<Item = &'s str>,
    ) -> Result<Vec<String>, AccountError> {
        let mut unique: Vec<String> = Vec::new();
        for subject in subjects.into_iter().map(str::trim).filter(|s| !s.is_empty()) {
            if !unique.iter().any(|s| s == subject) {
                unique.push(subject.to_string());
            }
        }
        self.profile.update(ProfilePatch::subjects(unique.clone())).await?;
        Ok(unique)
    }
}
