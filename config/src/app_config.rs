use directories::ProjectDirs;
use std::{
    env,
    path::PathBuf,
};

/// Prefix of every environment variable read by the exporter.
pub const ENV_PREFIX: &str = "SIMPLEMDM_EXPORTER";

lazy_static::lazy_static! {
    static ref CONFIG_FOLDER: Option<PathBuf> = env::var(format!("{ENV_PREFIX}_CONFIG"))
        .ok()
        .map(PathBuf::from);
}

pub fn get_config_dir() -> PathBuf {
    if let Some(s) = CONFIG_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.config_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".config")
    }
}

/// `config.yaml` inside [`get_config_dir`].
pub fn default_config_file() -> PathBuf {
    get_config_dir().join("config.yaml")
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "simplemdm", env!("CARGO_PKG_NAME"))
}
