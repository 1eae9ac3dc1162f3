use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub repo_dir: PathBuf,
    pub signal_path: PathBuf,
    pub manifest_path: PathBuf,

    pub check_interval_secs: u64,
    pub grace_secs: u64,

    pub window_start_hour: u32,
    pub window_end_hour: u32,
    pub utc_offset_hours: i32,

    pub restart_program: String,
    pub restart_args: Vec<String>,
    pub process_group: String,
}
