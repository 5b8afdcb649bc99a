use std::path::PathBuf;

/// Gateway runtime tunables, resolved from environment variables with
/// documented defaults. CLI flags take precedence over these when both are
/// present; callers apply that precedence by overwriting fields after
/// `GatewayConfig::from_env()`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub shared_secret: Option<String>,
    pub pid_file: PathBuf,
    pub log_file: Option<PathBuf>,
    pub hooks_dir: PathBuf,
    pub scheduler_dir: PathBuf,
    pub adapters_config: PathBuf,

    pub llm_threads: usize,
    pub io_threads: usize,
    pub max_tool_iterations: usize,
    pub max_tool_result_chars: usize,
    pub debounce_secs: f64,
    pub tool_call_mode: ToolCallMode,
    pub auto_continue_enabled: bool,
    pub auto_continue_max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallMode {
    Native,
    Xml,
    Langchain,
}

impl std::str::FromStr for ToolCallMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(ToolCallMode::Native),
            "xml" => Ok(ToolCallMode::Xml),
            "langchain" => Ok(ToolCallMode::Langchain),
            other => Err(format!("unknown tool call mode: {other}")),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("CLARA_GATEWAY_HOST", "127.0.0.1"),
            port: env_parse("CLARA_GATEWAY_PORT", 18789),
            shared_secret: std::env::var("CLARA_GATEWAY_SECRET").ok(),
            pid_file: PathBuf::from(env_or(
                "CLARA_GATEWAY_PIDFILE",
                "/tmp/clara-gateway.pid",
            )),
            log_file: std::env::var("CLARA_GATEWAY_LOGFILE").ok().map(PathBuf::from),
            hooks_dir: PathBuf::from(env_or("CLARA_HOOKS_DIR", "./hooks")),
            scheduler_dir: PathBuf::from(env_or("CLARA_SCHEDULER_DIR", ".")),
            adapters_config: PathBuf::from(env_or(
                "CLARA_ADAPTERS_CONFIG",
                "./adapters.yaml",
            )),
            llm_threads: env_parse("GATEWAY_LLM_THREADS", 10),
            io_threads: env_parse("GATEWAY_IO_THREADS", 20),
            max_tool_iterations: env_parse("GATEWAY_MAX_TOOL_ITERATIONS", 75),
            max_tool_result_chars: env_parse("GATEWAY_MAX_TOOL_RESULT_CHARS", 50_000),
            debounce_secs: env_parse("MESSAGE_DEBOUNCE_SECONDS", 2.0),
            tool_call_mode: std::env::var("TOOL_CALL_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(ToolCallMode::Xml),
            auto_continue_enabled: env_parse("AUTO_CONTINUE_ENABLED", true),
            auto_continue_max: env_parse("AUTO_CONTINUE_MAX", 3),
        }
    }

    /// PID file path for a named adapter subprocess.
    pub fn adapter_pid_file(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("/tmp/clara-adapter-{name}.pid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default_when_unset() {
        assert_eq!(env_parse::<u16>("CLARA_GATEWAY_PORT_DOES_NOT_EXIST", 18789), 18789);
        assert_eq!(
            env_parse::<usize>("GATEWAY_MAX_TOOL_ITERATIONS_DOES_NOT_EXIST", 75),
            75
        );
    }

    #[test]
    fn tool_call_mode_parses_known_values() {
        assert_eq!("native".parse::<ToolCallMode>(), Ok(ToolCallMode::Native));
        assert!("bogus".parse::<ToolCallMode>().is_err());
    }
}
