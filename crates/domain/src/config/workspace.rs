use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where conversations, materials, and outputs live on disk. Overridden by
/// the `NEXAGENT_DATA_ROOT` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "d_data_root")]
    pub data_root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            data_root: d_data_root(),
        }
    }
}

fn d_data_root() -> PathBuf {
    PathBuf::from("./data_store")
}
