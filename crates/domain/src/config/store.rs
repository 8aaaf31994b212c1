use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file backing the Task Store.
    #[serde(default = "d_database_path")]
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: d_database_path(),
        }
    }
}

fn d_database_path() -> String {
    dirs_data_dir_fallback("shadow-writing/tasks.db")
}

fn dirs_data_dir_fallback(suffix: &str) -> String {
    match std::env::var("XDG_DATA_HOME") {
        Ok(base) => format!("{base}/{suffix}"),
        Err(_) => format!("./.data/{suffix}"),
    }
}
