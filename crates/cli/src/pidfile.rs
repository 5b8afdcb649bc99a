//! Gateway PID file management: write/read/remove plus a staleness check
//! (the daemon may have died without cleaning up after itself). Parallels
//! `clara_supervisor::pidfile`'s adapter PID files, but for the gateway
//! process itself.

use std::path::Path;

use nix::sys::signal::kill;
use nix::unistd::Pid;

pub fn write(path: &Path, pid: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pid.to_string())
}

pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

fn read(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok().and_then(|s| s.trim().parse().ok())
}

/// `true` if a process with this PID currently exists.
pub fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Reads the PID recorded at `path`. If the file names a PID that no longer
/// exists, the stale file is removed and `None` is returned.
pub fn running_pid(path: &Path) -> Option<u32> {
    let pid = read(path)?;
    if process_alive(pid) {
        Some(pid)
    } else {
        remove(path);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");
        write(&path, std::process::id()).unwrap();
        assert_eq!(running_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn stale_pid_file_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.pid");
        // PID 1 always exists on a normal system, so pick something
        // exceedingly unlikely to be a live process instead.
        std::fs::write(&path, "999999").unwrap();
        assert_eq!(running_pid(&path), None);
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_has_no_running_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.pid");
        assert_eq!(running_pid(&path), None);
    }
}
