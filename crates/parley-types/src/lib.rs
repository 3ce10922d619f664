pub mod api;
pub mod models;

pub use api::NewMessage;
pub use models::{HistoryEntry, Message, Notification, Thread, User};
