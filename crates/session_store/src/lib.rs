//! Chat session persistence and the message-log primitives the conversation
//! engine builds on.

mod error;
mod export;
mod messages;
mod paths;
mod registry;
mod schema;
mod storage;

pub use error::SessionStoreError;
pub use export::{export_file_name, export_markdown};
pub use messages::MessageLog;
pub use paths::{default_data_dir, sessions_file, DATA_DIR_NAME, SESSIONS_FILE_NAME};
pub use registry::{SessionRegistry, DEFAULT_SESSION_TITLE};
pub use schema::{
    new_id, now_ms, Attachment, Feedback, LogEntry, Message, Role, Session, Timestamp,
    SNAPSHOT_VERSION,
};
pub use storage::{JsonFileStorage, MemoryStorage, SessionStorage};
