use relay_core::config::MagicLinkConfig;
use serde::{Deserialize, Serialize};

/// What a magic link authorizes. Purpose drives TTL and whether the email
/// must already belong to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    Login,
    Registration,
    PasswordReset,
    EmailVerify,
    AccountRecover,
}

impl Purpose {
    /// Login and password-reset only make sense for a known account;
    /// the others may be generated for emails we have never seen.
    pub fn requires_existing_user(&self) -> bool {
        matches!(self, Purpose::Login | Purpose::PasswordReset)
    }

    pub fn ttl_secs(&self, cfg: &MagicLinkConfig) -> u64 {
        match self {
            Purpose::Login => cfg.ttl_login_secs,
            Purpose::Registration => cfg.ttl_registration_secs,
            Purpose::PasswordReset => cfg.ttl_password_reset_secs,
            Purpose::EmailVerify => cfg.ttl_email_verify_secs,
            Purpose::AccountRecover => cfg.ttl_account_recover_secs,
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Purpose::Login => "login",
            Purpose::Registration => "registration",
            Purpose::PasswordReset => "password-reset",
            Purpose::EmailVerify => "email-verify",
            Purpose::AccountRecover => "account-recover",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "login" => Ok(Purpose::Login),
            "registration" => Ok(Purpose::Registration),
            "password-reset" => Ok(Purpose::PasswordReset),
            "email-verify" => Ok(Purpose::EmailVerify),
            "account-recover" => Ok(Purpose::AccountRecover),
            other => Err(format!("unknown purpose: {}", other)),
        }
    }
}

/// The result of a successful `generate`. The raw token exists only here
/// and in the delivered link; storage keeps its hash.
#[derive(Debug, Clone)]
pub struct GeneratedLink {
    pub token: String,
    pub url: String,
    pub purpose: Purpose,
    pub expires_at: String,
}

/// Non-consuming validity report. Safe to call repeatedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid {
        email: String,
        user_id: Option<i64>,
        purpose: Purpose,
        expires_at: String,
    },
    Consumed,
    Expired,
    Revoked,
    NotFound,
}

/// What `consume` hands back on the one successful call.
#[derive(Debug, Clone)]
pub struct ConsumedLink {
    pub email: String,
    pub user_id: Option<i64>,
    pub purpose: Purpose,
}
