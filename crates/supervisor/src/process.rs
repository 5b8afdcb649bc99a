use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;

use clara_config::AdapterConfig;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Expand `${ENVVAR}` placeholders in `value` from the supervisor's own
/// environment, leaving unknown placeholders untouched rather than failing
/// the adapter's launch.
pub fn expand_env_placeholders(value: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for capture in pattern.captures_iter(value) {
        let whole = capture.get(0).unwrap();
        out.push_str(&value[last..whole.start()]);
        let var_name = &capture[1];
        match std::env::var(var_name) {
            Ok(resolved) => out.push_str(&resolved),
            Err(_) => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&value[last..]);
    out
}

/// Spawn one adapter's subprocess, piping stdout/stderr into tracing under
/// a namespaced target.
pub fn spawn(name: &str, config: &AdapterConfig, working_dir: Option<&Path>) -> std::io::Result<Child> {
    let (program, args) = config
        .module
        .split_first()
        .expect("adapter module must name at least a program");

    let mut command = Command::new(program);
    command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    let resolved_env: HashMap<String, String> = config
        .env
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect();
    command.envs(&resolved_env);

    let mut child = command.spawn()?;
    let target: &'static str = Box::leak(format!("adapter::{name}").into_boxed_str());

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, target, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, target, true));
    }

    Ok(child)
}

async fn forward_lines(stream: impl tokio::io::AsyncRead + Unpin, target: &'static str, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => re_emit(target, &line, is_stderr),
            Ok(None) => break,
            Err(e) => {
                warn!(target: "clara_supervisor", error = %e, "error reading adapter output");
                break;
            }
        }
    }
}

/// `HH:MM:SS LEVEL [logger] message`, the gateway's own log line shape.
fn log_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{2}:\d{2}:\d{2}\s+(TRACE|DEBUG|INFO|WARN|ERROR)\s+\[[^\]]+\]\s+(.*)$").unwrap()
    })
}

fn re_emit(target: &'static str, line: &str, is_stderr: bool) {
    if let Some(captures) = log_line_pattern().captures(line) {
        let message = captures[2].to_string();
        match &captures[1] {
            "TRACE" => debug!(target: target, "{message}"),
            "DEBUG" => debug!(target: target, "{message}"),
            "WARN" => warn!(target: target, "{message}"),
            "ERROR" => error!(target: target, "{message}"),
            _ => info!(target: target, "{message}"),
        }
        return;
    }
    if is_stderr {
        warn!(target: target, "{line}");
    } else {
        info!(target: target, "{line}");
    }
}

#[cfg(unix)]
pub fn send_terminate(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
pub fn send_terminate(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unsafe_code)]
    fn expands_known_env_var() {
        unsafe {
            std::env::set_var("CLARA_TEST_EXPAND_VAR", "resolved");
        }
        assert_eq!(
            expand_env_placeholders("prefix-${CLARA_TEST_EXPAND_VAR}-suffix"),
            "prefix-resolved-suffix"
        );
        unsafe {
            std::env::remove_var("CLARA_TEST_EXPAND_VAR");
        }
    }

    #[test]
    fn leaves_unknown_placeholder_untouched() {
        assert_eq!(
            expand_env_placeholders("${CLARA_DEFINITELY_UNSET_VAR_XYZ}"),
            "${CLARA_DEFINITELY_UNSET_VAR_XYZ}"
        );
    }

    #[test]
    fn recognizes_gateway_log_line_shape() {
        let captures = log_line_pattern()
            .captures("12:30:05 WARN [adapter.discord] reconnecting")
            .unwrap();
        assert_eq!(&captures[1], "WARN");
        assert_eq!(&captures[2], "reconnecting");
    }
}
