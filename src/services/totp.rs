//! Time-based one-time passwords
//!
//! RFC 6238 with SHA1, six digits and a 30 second step. Secrets are stored
//! base32 encoded in the account configuration.

use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    #[error("Stored TOTP secret is invalid")]
    InvalidSecret,

    #[error("Failed to build TOTP: {0}")]
    Build(String),

    #[error("System clock error: {0}")]
    Clock(#[from] std::time::SystemTimeError),
}

/// Material returned to the client when enrolling an authenticator
#[derive(Debug, Clone, serde::Serialize)]
pub struct TotpEnrollment {
    pub secret: String,
    pub otpauth_url: String,
    /// PNG, base64 encoded
    pub qr_code: String,
}

#[derive(Debug, Clone)]
pub struct TotpService {
    issuer: String,
    skew: u8,
}

impl TotpService {
    pub fn new(issuer: impl Into<String>, skew: u8) -> Self {
        Self {
            issuer: issuer.into(),
            skew,
        }
    }

    /// Fresh base32 secret
    pub fn generate_secret(&self) -> String {
        match Secret::generate_secret().to_encoded() {
            Secret::Encoded(s) => s,
            Secret::Raw(bytes) => data_encoding::BASE32_NOPAD.encode(&bytes),
        }
    }

    fn build(&self, secret: &str, account: &str) -> Result<TOTP, TotpError> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|_| TotpError::InvalidSecret)?;

        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            self.skew,
            STEP_SECONDS,
            bytes,
            Some(self.issuer.clone()),
            account.replace(':', ""),
        )
        .map_err(|e| TotpError::Build(e.to_string()))
    }

    pub fn enrollment(&self, secret: &str, account: &str) -> Result<TotpEnrollment, TotpError> {
        let totp = self.build(secret, account)?;
        let qr_code = totp.get_qr_base64().map_err(TotpError::Build)?;

        Ok(TotpEnrollment {
            secret: secret.to_string(),
            otpauth_url: totp.get_url(),
            qr_code,
        })
    }

    /// Accepts codes within `skew` steps of now
    pub fn verify(&self, secret: &str, account: &str, code: &str) -> Result<bool, TotpError> {
        let code = code.trim();
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        let totp = self.build(secret, account)?;
        Ok(totp.check_current(code)?)
    }

    #[cfg(test)]
    pub(crate) fn current_code(&self, secret: &str, account: &str) -> String {
        self.build(secret, account)
            .unwrap()
            .generate_current()
            .unwrap()
    }
}
