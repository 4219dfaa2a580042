use std::path::{Path, PathBuf};

pub const DATA_DIR_NAME: &str = ".agno_chat";
pub const SESSIONS_FILE_NAME: &str = "sessions.json";

#[must_use]
pub fn default_data_dir(cwd: &Path) -> PathBuf {
    cwd.join(DATA_DIR_NAME)
}

#[must_use]
pub fn sessions_file(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSIONS_FILE_NAME)
}
