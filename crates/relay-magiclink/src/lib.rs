pub mod db;
pub mod error;
pub mod issuer;
pub mod mailer;
pub mod types;

pub use error::{MagicLinkError, Result};
pub use issuer::MagicLinkIssuer;
pub use mailer::{LinkMailer, LogMailer};
