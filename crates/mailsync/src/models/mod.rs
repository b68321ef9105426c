//! Domain models for mailbox sync

mod cursor;
mod history;
mod message;
mod notification;

pub use cursor::{CursorState, HistoryCursor};
pub use history::{ChangeKind, ChangeRecord, HistoryDelta, WatchRegistration};
pub use message::{MessageDetail, MessageId, MessagePart, PartBody};
pub use notification::Notification;
