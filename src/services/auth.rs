//! Account lifecycle and authentication
//!
//! Signup, login with a persisted JWT pair, refresh, logout, password
//! changes, deactivation, deletion and TOTP two-factor enrollment.
//!
//! A JWT alone is not enough: every request token must also match a
//! non-revoked row in `access_tokens`, so revoking the rows logs a user out
//! everywhere.

use crate::config::Config;
use crate::db::repositories::{SubscriptionRepository, TokenRepository, UserRepository};
use crate::models::{
    AccountConfig, CreateUserInput, NewAccessToken, NewSubscription, User, UserStatus,
};
use crate::services::notification::{NotificationKind, NotificationMessage, NotificationQueue};
use crate::services::password::{generate_temporary_password, hash_password, verify_password};
use crate::services::token::{IssuedToken, TokenError, TokenKind, TokenSigner};
use crate::services::totp::{TotpEnrollment, TotpError, TotpService};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Tier every new account starts on
const SIGNUP_TIER: &str = "Basic";
const MIN_PASSWORD_LENGTH: usize = 6;
const TOTP_METHOD: &str = "totp";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("This account has been deleted")]
    AccountDeleted,

    #[error("Invalid or revoked token")]
    InvalidToken,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("User not found")]
    UserNotFound,

    #[error("Two-factor authentication is already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("Two-factor authentication has not been set up")]
    TwoFactorNotConfigured,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error(transparent)]
    Totp(#[from] TotpError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub agree_terms: bool,
}

/// Tokens handed out by a successful login
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub two_factor_required: bool,
}

pub struct AuthService {
    user_repo: Arc<dyn UserRepository>,
    subscription_repo: Arc<dyn SubscriptionRepository>,
    token_repo: Arc<dyn TokenRepository>,
    notifier: NotificationQueue,
    signer: TokenSigner,
    totp: TotpService,
    deactivation_days: i64,
    free_tier_days: i64,
    platform_name: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl AuthService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        subscription_repo: Arc<dyn SubscriptionRepository>,
        token_repo: Arc<dyn TokenRepository>,
        notifier: NotificationQueue,
        config: &Config,
    ) -> Self {
        Self {
            user_repo,
            subscription_repo,
            token_repo,
            notifier,
            signer: TokenSigner::from_config(&config.auth),
            totp: TotpService::new(config.auth.totp_issuer.clone(), config.auth.totp_skew),
            deactivation_days: config.auth.deactivation_days,
            free_tier_days: config.auth.free_tier_days,
            platform_name: config.notification.platform_name.clone(),
        }
    }

    /// Create an account on the free tier.
    ///
    /// The new user gets an active free subscription record and a disabled
    /// two-factor configuration.
    pub async fn signup(&self, input: SignupInput) -> Result<User, AuthError> {
        if !input.agree_terms {
            return Err(AuthError::Validation("You must agree to the terms".to_string()));
        }
        if input.password != input.password_confirm {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }
        if input.password.len() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let email = normalize_email(&input.email);
        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(AuthError::EmailTaken);
        }

        let tier = self
            .subscription_repo
            .get_tier_by_name(SIGNUP_TIER)
            .await
            .context("Failed to load signup tier")?
            .ok_or_else(|| anyhow!("Subscription tier '{}' is not seeded", SIGNUP_TIER))?;

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;

        let user = self
            .user_repo
            .create(&CreateUserInput {
                first_name: input.first_name.trim().to_string(),
                last_name: input.last_name.trim().to_string(),
                email,
                password_hash,
                subscription_tier_id: tier.id,
            })
            .await
            .context("Failed to create user")?;

        let now = Utc::now();
        let subscription = self
            .subscription_repo
            .create(&NewSubscription {
                user_id: user.id,
                tier_id: tier.id,
                description: "Free Tier".to_string(),
                payment_method: "free".to_string(),
                amount: 0.0,
                start_date: now,
                end_date: now + Duration::days(self.free_tier_days),
            })
            .await
            .context("Failed to create free subscription")?;

        self.user_repo
            .save_account_config(&AccountConfig {
                user_id: user.id,
                ..Default::default()
            })
            .await
            .context("Failed to create account configuration")?;

        tracing::info!("User {} signed up", user.id);

        self.notifier.submit(
            NotificationMessage::new(
                NotificationKind::AccountSignup,
                &user.email,
                format!("Welcome to {}", self.platform_name),
            )
            .name(user.display_name())
            .body("Your account has been created."),
        );
        self.notifier.submit(
            NotificationMessage::new(
                NotificationKind::Subscription,
                &user.email,
                format!("Your {} subscription", tier.name),
            )
            .name(user.display_name())
            .body(format!("You are now on the {} plan.", tier.name))
            .meta("tier", &tier.name)
            .meta("end_date", subscription.end_date.format("%Y-%m-%d")),
        );

        Ok(user)
    }

    /// Check credentials and issue a stored token pair.
    ///
    /// Throttling is the caller's concern; this only decides on the
    /// credentials themselves.
    pub async fn login(&self, email: &str, password: &str, ip_address: &str) -> Result<LoginOutcome, AuthError> {
        let user = self
            .user_repo
            .get_by_email(&normalize_email(email))
            .await
            .context("Failed to load user")?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash).context("Failed to verify password")? {
            return Err(AuthError::InvalidCredentials);
        }

        if user.is_deleted() {
            return Err(AuthError::AccountDeleted);
        }

        if user.is_deactivated() {
            self.user_repo
                .set_status(user.id, UserStatus::Active, None)
                .await
                .context("Failed to reactivate account")?;
            tracing::info!("User {} reactivated by login", user.id);
        }

        let access = self.signer.issue(user.id, &user.email, TokenKind::Access)?;
        let refresh = self.signer.issue(user.id, &user.email, TokenKind::Refresh)?;

        self.token_repo
            .create(&NewAccessToken {
                user_id: user.id,
                access_token: access.token.clone(),
                refresh_token: refresh.token.clone(),
                ip_address: ip_address.to_string(),
                access_expires_at: access.expires_at,
                refresh_expires_at: refresh.expires_at,
            })
            .await
            .context("Failed to store tokens")?;

        let config = self
            .user_repo
            .get_account_config(user.id)
            .await
            .context("Failed to load account configuration")?;

        Ok(LoginOutcome {
            user_id: user.id,
            access_token: access.token,
            refresh_token: refresh.token,
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
            two_factor_required: config.two_factor_enabled,
        })
    }

    /// Resolve the user behind a bearer access token
    pub async fn authenticate(&self, access_token: &str) -> Result<User, AuthError> {
        let claims = self.signer.verify(access_token, TokenKind::Access)?;

        let row = self
            .token_repo
            .find_by_access(access_token)
            .await
            .context("Failed to look up token")?
            .ok_or(AuthError::InvalidToken)?;
        if row.user_id != claims.sub {
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .user_repo
            .get_by_id(claims.sub)
            .await
            .context("Failed to load user")?
            .ok_or(AuthError::InvalidToken)?;
        if user.is_deleted() {
            return Err(AuthError::InvalidToken);
        }
        Ok(user)
    }

    /// Trade a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedToken, AuthError> {
        let claims = self.signer.verify(refresh_token, TokenKind::Refresh)?;

        let row = self
            .token_repo
            .find_by_refresh(refresh_token)
            .await
            .context("Failed to look up token")?
            .ok_or(AuthError::InvalidToken)?;
        if row.user_id != claims.sub || row.refresh_expired(Utc::now()) {
            return Err(AuthError::InvalidToken);
        }

        let access = self.signer.issue(claims.sub, &claims.email, TokenKind::Access)?;
        self.token_repo
            .update_access(row.id, &access.token, access.expires_at)
            .await
            .context("Failed to store refreshed token")?;

        Ok(access)
    }

    pub async fn logout(&self, user_id: i64) -> Result<(), AuthError> {
        let removed = self
            .token_repo
            .delete_all_for_user(user_id)
            .await
            .context("Failed to delete tokens")?;
        tracing::debug!("Logged out user {} ({} tokens removed)", user_id, removed);
        Ok(())
    }

    /// Replace the password with a random one and mail it to the user
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let user = self
            .user_repo
            .get_by_email(&normalize_email(email))
            .await
            .context("Failed to load user")?
            .ok_or(AuthError::UserNotFound)?;

        let temporary = generate_temporary_password();
        let hash = hash_password(&temporary).context("Failed to hash password")?;
        self.user_repo
            .update_password(user.id, &hash)
            .await
            .context("Failed to update password")?;

        tracing::info!("Password reset for user {}", user.id);
        self.notifier.submit(
            NotificationMessage::new(NotificationKind::PasswordReset, &user.email, "Your password has been reset")
                .name(user.display_name())
                .body("Use the temporary password below to sign in, then choose a new one.")
                .meta("temporary_password", temporary),
        );
        Ok(())
    }

    pub async fn change_password(&self, user: &User, recent_password: &str, new_password: &str) -> Result<(), AuthError> {
        if new_password.len() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if !verify_password(recent_password, &user.password_hash).context("Failed to verify password")? {
            return Err(AuthError::Validation("Recent password is incorrect".to_string()));
        }

        let hash = hash_password(new_password).context("Failed to hash password")?;
        self.user_repo
            .update_password(user.id, &hash)
            .await
            .context("Failed to update password")?;
        self.token_repo
            .revoke_all_for_user(user.id)
            .await
            .context("Failed to revoke tokens")?;

        self.notifier.submit(
            NotificationMessage::new(NotificationKind::PasswordReset, &user.email, "Your password was changed")
                .name(user.display_name())
                .body("Your password was changed and you have been signed out of every device."),
        );
        Ok(())
    }

    /// Disable the account for the configured number of days
    pub async fn deactivate(&self, user: &User) -> Result<DateTime<Utc>, AuthError> {
        let until = Utc::now() + Duration::days(self.deactivation_days);
        self.user_repo
            .set_status(user.id, UserStatus::Deactivated, Some(until))
            .await
            .context("Failed to deactivate account")?;
        self.token_repo
            .revoke_all_for_user(user.id)
            .await
            .context("Failed to revoke tokens")?;

        tracing::info!("User {} deactivated until {}", user.id, until);
        self.notifier.submit(
            NotificationMessage::new(NotificationKind::DeactivateAccount, &user.email, "Your account is deactivated")
                .name(user.display_name())
                .body("Sign in again at any time to reactivate your account.")
                .meta("deactivated_until", until.format("%Y-%m-%d")),
        );
        Ok(until)
    }

    pub async fn delete(&self, user: &User) -> Result<(), AuthError> {
        self.user_repo
            .set_status(user.id, UserStatus::Deleted, None)
            .await
            .context("Failed to delete account")?;
        self.token_repo
            .revoke_all_for_user(user.id)
            .await
            .context("Failed to revoke tokens")?;

        tracing::info!("User {} deleted their account", user.id);
        self.notifier.submit(
            NotificationMessage::new(NotificationKind::DeleteAccount, &user.email, "Your account has been deleted")
                .name(user.display_name())
                .body(format!("Thank you for using {}.", self.platform_name)),
        );
        Ok(())
    }

    /// Store a fresh secret and return what an authenticator app needs
    pub async fn generate_totp(&self, user: &User) -> Result<TotpEnrollment, AuthError> {
        let mut config = self
            .user_repo
            .get_account_config(user.id)
            .await
            .context("Failed to load account configuration")?;
        if config.two_factor_enabled {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }

        let secret = self.totp.generate_secret();
        let enrollment = self.totp.enrollment(&secret, &user.email)?;

        config.user_id = user.id;
        config.totp_secret = Some(secret);
        self.user_repo
            .save_account_config(&config)
            .await
            .context("Failed to save account configuration")?;

        Ok(enrollment)
    }

    /// Confirm enrollment with a first code and switch 2FA on
    pub async fn verify_totp(&self, user: &User, code: &str) -> Result<(), AuthError> {
        let mut config = self
            .user_repo
            .get_account_config(user.id)
            .await
            .context("Failed to load account configuration")?;
        let secret = config
            .totp_secret
            .clone()
            .ok_or(AuthError::TwoFactorNotConfigured)?;

        if !self.totp.verify(&secret, &user.email, code)? {
            return Err(AuthError::InvalidCode);
        }

        config.user_id = user.id;
        config.two_factor_enabled = true;
        config.two_factor_method = Some(TOTP_METHOD.to_string());
        self.user_repo
            .save_account_config(&config)
            .await
            .context("Failed to save account configuration")?;

        self.notifier.submit(
            NotificationMessage::new(
                NotificationKind::TwoFactorAuth,
                &user.email,
                "Two-factor authentication enabled",
            )
            .name(user.display_name())
            .body("Your account now requires a code from your authenticator app to sign in."),
        );
        Ok(())
    }

    /// Second login step for accounts with 2FA enabled
    pub async fn verify_tfa(&self, user: &User, code: &str, ip_address: &str) -> Result<(), AuthError> {
        let config = self
            .user_repo
            .get_account_config(user.id)
            .await
            .context("Failed to load account configuration")?;
        let secret = match (&config.totp_secret, config.two_factor_enabled) {
            (Some(secret), true) => secret.clone(),
            _ => return Err(AuthError::TwoFactorNotConfigured),
        };

        if !self.totp.verify(&secret, &user.email, code)? {
            return Err(AuthError::InvalidCode);
        }

        self.notifier.submit(
            NotificationMessage::new(NotificationKind::TwoFactorLogin, &user.email, "New sign-in to your account")
                .name(user.display_name())
                .body("A sign-in was completed with your authenticator code.")
                .meta("ip_address", ip_address)
                .meta("time", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")),
        );
        Ok(())
    }

    #[cfg(test)]
    fn totp(&self) -> &TotpService {
        &self.totp
    }
}
