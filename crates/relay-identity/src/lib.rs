pub mod cache;
pub mod db;
pub mod error;
pub mod sessions;
pub mod token;
pub mod types;
pub mod users;

pub use error::{IdentityError, Result};
pub use sessions::SessionManager;
pub use users::UserStore;
