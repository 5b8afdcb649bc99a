//! POSIX double-fork daemonization: fork, detach from the controlling
//! terminal via `setsid`, fork a second time so the daemon can never
//! reacquire a terminal, then redirect stdio.
//!
//! `nix::unistd::fork` is unsafe in a multi-threaded process; this is called
//! at the very top of `main`, before the Tokio runtime (and therefore any
//! other thread) exists, which is the same narrow justification the
//! supervisor crate uses for its own `#[allow(unsafe_code)]` test helper.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::unistd::{ForkResult, chdir, dup2, fork, setsid};

/// Forks into the background and detaches from the terminal. Only the final
/// daemon process returns from this call; both intermediate parents exit
/// immediately.
#[allow(unsafe_code)]
pub fn daemonize(log_file: Option<&Path>) -> anyhow::Result<()> {
    // Safety: no other threads exist yet at this point in `main`.
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid()?;
    chdir("/")?;

    // Safety: same single-threaded startup window as the first fork.
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    redirect_stdio(log_file)?;
    Ok(())
}

fn redirect_stdio(log_file: Option<&Path>) -> anyhow::Result<()> {
    let target = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(path)?
        }
        None => OpenOptions::new().read(true).write(true).open("/dev/null")?,
    };
    let fd = target.as_raw_fd();
    dup2(fd, 0)?;
    dup2(fd, 1)?;
    dup2(fd, 2)?;
    // The duplicated fds keep the file open; drop the original without
    // closing it out from under the now-aliased stdio descriptors.
    std::mem::forget(target);
    Ok(())
}
