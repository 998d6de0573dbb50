use serde::{Deserialize, Serialize};

/// Verified identity attached to admitted requests. Just enough profile to
/// pass downstream; the user directory owns the full record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub current_workspace: Option<String>,
}
