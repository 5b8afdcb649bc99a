use std::path::PathBuf;

/// Well-known PID file path for a named adapter
/// (`/tmp/clara-adapter-<name>.pid`).
pub fn pid_file_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/clara-adapter-{name}.pid"))
}

pub fn write(name: &str, pid: u32) -> std::io::Result<()> {
    std::fs::write(pid_file_path(name), pid.to_string())
}

pub fn remove(name: &str) {
    let _ = std::fs::remove_file(pid_file_path(name));
}

/// Read back a previously-written PID file, returning `None` if absent or
/// unparseable (a stale or corrupt file should not crash a `status` query).
pub fn read(name: &str) -> Option<u32> {
    std::fs::read_to_string(pid_file_path(name))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}
