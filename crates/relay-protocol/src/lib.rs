pub mod frames;

pub use frames::{ClientFrame, ServerFrame, WireMessage};
