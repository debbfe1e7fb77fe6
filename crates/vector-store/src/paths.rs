use std::path::{Path, PathBuf};

/// Per-project state directory, created under the scanned root
pub const STATE_DIR_NAME: &str = ".consolidator";

pub const INDEX_FILE_NAME: &str = "index.json";
pub const CHECKPOINT_FILE_NAME: &str = "checkpoint.json";

#[must_use]
pub fn state_dir_for_root(root: &Path) -> PathBuf {
    root.join(STATE_DIR_NAME)
}

#[must_use]
pub fn index_path_for_root(root: &Path) -> PathBuf {
    state_dir_for_root(root).join(INDEX_FILE_NAME)
}

#[must_use]
pub fn checkpoint_path_for_root(root: &Path) -> PathBuf {
    state_dir_for_root(root).join(CHECKPOINT_FILE_NAME)
}
