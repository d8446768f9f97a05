pub mod registry;

pub use registry::{AttachOutcome, DetachOutcome, PresenceRegistry};
