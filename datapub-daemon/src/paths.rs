use std::path::{Path, PathBuf};

use datapub_core::config::datapub_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    datapub_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}
