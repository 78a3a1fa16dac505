mod change;
mod identity;
mod notification;
pub mod rows;

pub use change::{ChangeType, RawChange, SourceEvent};
pub use identity::{Identity, Role};
pub use notification::{NotificationKind, NotificationRecord, Route};
pub use rows::{ChildRef, LessonInfo};
