pub mod cache;
pub mod conversations;
pub mod db;
pub mod error;
pub mod mentions;
pub mod messages;
pub mod types;

pub use conversations::ConversationStore;
pub use error::{Result, StoreError};
pub use messages::MessageStore;
