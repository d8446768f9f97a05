pub mod db;
pub mod dispatcher;
pub mod error;
pub mod routing;
pub mod sender;
pub mod store;
pub mod types;

pub use dispatcher::Dispatcher;
pub use error::{NotifyError, Result};
pub use sender::{ChannelSender, SendFailure};
pub use store::NotificationStore;
