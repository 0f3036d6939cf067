use std::path::PathBuf;

use crate::APP_NAME;

pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn default_sqlite_path() -> PathBuf {
    data_dir().join("chatvault.sqlite")
}

pub fn default_html_dir() -> PathBuf {
    data_dir().join("html")
}

pub fn default_export_dir() -> PathBuf {
    data_dir().join("json")
}
