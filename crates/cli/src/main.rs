//! `clara-gateway`: argument parsing, daemonization, PID file management,
//! and the process entrypoint that wires every crate in the workspace into
//! one running gateway.
//!
//! Subcommands: `start`/`stop`/`status`/`restart` manage the gateway daemon
//! itself; `adapter NAME <action>` manages one adapter directly, independent
//! of whatever the running gateway's own supervisor is doing; `logs` tails
//! the configured log file.

mod daemonize;
mod pidfile;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use clara_config::{AdaptersFile, GatewayConfig, load_yaml};
use clara_gateway::{ConnectionRuntime, EventEmitter, GatewayState, HookManager};
use clara_orchestrator::LlmOrchestrator;
use clara_routing::MessageRouter;
use clara_scheduler::{MessageSink, Scheduler};
use clara_service_traits::{LlmProvider, MemoryStore, NoopLlmProvider, NoopMemoryStore, ToolExecutor};
use clara_supervisor::AdapterSupervisor;
use clara_tools::{ToolExecutorImpl, ToolRegistry, register_builtins};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "clara-gateway", about = "Clara Gateway — central message processing hub for platform adapters")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Bind address (overrides CLARA_GATEWAY_HOST).
    #[arg(long, global = true)]
    host: Option<String>,
    /// Port to listen on (overrides CLARA_GATEWAY_PORT).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// PID file path (overrides CLARA_GATEWAY_PIDFILE).
    #[arg(long, global = true)]
    pidfile: Option<PathBuf>,
    /// Log file path when daemonized (overrides CLARA_GATEWAY_LOGFILE).
    #[arg(long, global = true)]
    logfile: Option<PathBuf>,
    /// Directory containing hooks.yaml (overrides CLARA_HOOKS_DIR).
    #[arg(long, global = true)]
    hooks_dir: Option<PathBuf>,
    /// Directory containing scheduler.yaml (overrides CLARA_SCHEDULER_DIR).
    #[arg(long, global = true)]
    scheduler_dir: Option<PathBuf>,
    /// Path to adapters.yaml (overrides CLARA_ADAPTERS_CONFIG).
    #[arg(long, global = true)]
    adapters_config: Option<PathBuf>,
    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway (daemonized unless `-f`).
    Start {
        #[arg(short = 'f', long)]
        foreground: bool,
        /// Start only the named adapter(s); repeatable.
        #[arg(long = "adapter")]
        adapters: Vec<String>,
        /// Start the gateway without spawning any adapters.
        #[arg(long)]
        no_adapters: bool,
    },
    /// Stop a running gateway daemon.
    Stop,
    /// Print gateway and per-adapter status from PID files.
    Status,
    /// Stop then start the gateway.
    Restart {
        #[arg(short = 'f', long)]
        foreground: bool,
    },
    /// Control one configured adapter directly.
    Adapter {
        name: String,
        #[command(subcommand)]
        action: AdapterAction,
    },
    /// Tail the gateway's log file.
    Logs {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
        #[arg(short, long)]
        follow: bool,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum AdapterAction {
    Start,
    Stop,
    Restart,
    Status,
}

// Not `#[tokio::main]`: by the time that macro's async body starts running,
// the multi-thread runtime has already spawned its worker threads, and
// `fork()` after that point leaves the child without them. `daemonize` must
// run before any Tokio runtime exists, so the runtime is built manually,
// after the daemonization decision, inside `cmd_start`.
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(cli.json_logs);

    let mut config = GatewayConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(path) = cli.pidfile {
        config.pid_file = path;
    }
    if let Some(path) = cli.logfile {
        config.log_file = Some(path);
    }
    if let Some(path) = cli.hooks_dir {
        config.hooks_dir = path;
    }
    if let Some(path) = cli.scheduler_dir {
        config.scheduler_dir = path;
    }
    if let Some(path) = cli.adapters_config {
        config.adapters_config = path;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "clara-gateway starting");

    let command = cli.command.unwrap_or(Command::Start {
        foreground: true,
        adapters: Vec::new(),
        no_adapters: false,
    });

    match command {
        Command::Start { foreground, adapters, no_adapters } => cmd_start(config, foreground, adapters, no_adapters),
        Command::Stop => cmd_stop(&config),
        Command::Status => cmd_status(&config),
        Command::Restart { foreground } => cmd_restart(config, foreground),
        Command::Adapter { name, action } => cmd_adapter(&config, &name, action),
        Command::Logs { lines, follow } => cmd_logs(&config, lines, follow),
    }
}

fn init_telemetry(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false)).init();
    }
}

fn cmd_start(config: GatewayConfig, foreground: bool, adapters: Vec<String>, no_adapters: bool) -> anyhow::Result<()> {
    if let Some(pid) = pidfile::running_pid(&config.pid_file) {
        bail!("gateway already running (PID {pid})");
    }

    let adapter_names = if no_adapters {
        Some(Vec::new())
    } else if adapters.is_empty() {
        None
    } else {
        Some(adapters)
    };

    if !foreground {
        info!(pidfile = %config.pid_file.display(), "daemonizing");
        daemonize::daemonize(config.log_file.as_deref())?;
    }

    pidfile::write(&config.pid_file, std::process::id())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;
    let result = runtime.block_on(run_gateway(&config, adapter_names));

    pidfile::remove(&config.pid_file);
    result
}

async fn run_gateway(config: &GatewayConfig, adapter_names: Option<Vec<String>>) -> anyhow::Result<()> {
    // `Scheduler` needs a `MessageSink` at construction, but the natural
    // sink is `GatewayState`, which needs the scheduler already built. This
    // lazily-populated indirection breaks the cycle: the scheduler holds it
    // from the start, and it starts delivering once `GatewayState` exists.
    let sink = Arc::new(LazySink::default());
    let scheduler = Arc::new(Scheduler::new(config.scheduler_dir.clone(), sink.clone() as Arc<dyn MessageSink>));
    let tasks_loaded = scheduler.load_from_file(None).await;
    info!(tasks_loaded, "scheduler ready");

    let (router, activated_rx) = MessageRouter::new(Duration::from_secs_f64(config.debounce_secs));

    let mut tool_registry = ToolRegistry::new();
    register_builtins(&mut tool_registry);
    let tool_executor: Arc<dyn ToolExecutor> = Arc::new(ToolExecutorImpl::new(tool_registry));
    let llm_provider: Arc<dyn LlmProvider> = Arc::new(NoopLlmProvider);
    let orchestrator = Arc::new(LlmOrchestrator::new(llm_provider, tool_executor));

    let adapters_file: AdaptersFile = load_yaml(&config.adapters_config).unwrap_or_default();
    let adapter_count = adapters_file.adapters.len();
    let supervisor = Arc::new(AdapterSupervisor::new(adapters_file.adapters));

    let events = EventEmitter::new();
    let hooks = HookManager::new(events.clone(), config.hooks_dir.clone());
    let hooks_loaded = hooks.load_from_file(None).await;
    info!(hooks_loaded, "hooks system ready");

    let state = GatewayState::new(router, orchestrator, supervisor.clone(), scheduler.clone(), events, hooks, config.shared_secret.clone());
    sink.set(state.clone());

    let memory: Arc<dyn MemoryStore> = Arc::new(NoopMemoryStore);
    let runtime = ConnectionRuntime::new(state.clone(), memory);

    tokio::spawn(runtime.clone().run_activation_consumer(activated_rx));
    tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    let should_start_adapters = adapter_names.as_ref().map(|names| !names.is_empty()).unwrap_or(true);
    if should_start_adapters {
        supervisor.start(adapter_names.as_deref()).await.context("starting adapters")?;
        info!(configured = adapter_count, "adapters launched");
    }

    let addr: std::net::SocketAddr = format!("{}:{}", config.host, config.port).parse().context("invalid bind address")?;
    let server = tokio::spawn(clara_gateway::start_gateway(addr, runtime));

    info!(%addr, "gateway ready and accepting connections");
    wait_for_shutdown().await?;
    info!("shutdown signal received");

    scheduler.stop();
    server.abort();
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

fn cmd_stop(config: &GatewayConfig) -> anyhow::Result<()> {
    match pidfile::running_pid(&config.pid_file) {
        Some(pid) => {
            terminate_and_wait(pid, Duration::from_secs(5))?;
            pidfile::remove(&config.pid_file);
            println!("Gateway stopped");
            Ok(())
        }
        None => {
            println!("Gateway not running");
            bail!("gateway not running")
        }
    }
}

fn cmd_status(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("Gateway Status");
    match pidfile::running_pid(&config.pid_file) {
        Some(pid) => println!("  gateway      running  (PID {pid})"),
        None => println!("  gateway      stopped"),
    }

    println!("Adapter Status");
    let adapters_file: AdaptersFile = load_yaml(&config.adapters_config).unwrap_or_default();
    let mut names: Vec<&String> = adapters_file.adapters.keys().collect();
    names.sort();
    for name in names {
        match pidfile::running_pid(&config.adapter_pid_file(name)) {
            Some(pid) => println!("  {name:<12} running  (PID {pid})"),
            None => println!("  {name:<12} stopped"),
        }
    }
    Ok(())
}

fn cmd_restart(config: GatewayConfig, foreground: bool) -> anyhow::Result<()> {
    if let Some(pid) = pidfile::running_pid(&config.pid_file) {
        info!(pid, "stopping gateway before restart");
        terminate_and_wait(pid, Duration::from_secs(5))?;
        pidfile::remove(&config.pid_file);
        std::thread::sleep(Duration::from_secs(1));
    }
    cmd_start(config, foreground, Vec::new(), false)
}

fn cmd_adapter(config: &GatewayConfig, name: &str, action: AdapterAction) -> anyhow::Result<()> {
    let adapter_pidfile = config.adapter_pid_file(name);
    match action {
        AdapterAction::Status => {
            match pidfile::running_pid(&adapter_pidfile) {
                Some(pid) => println!("{name}  running  (PID {pid})"),
                None => println!("{name}  stopped"),
            }
            Ok(())
        }
        AdapterAction::Stop => match pidfile::running_pid(&adapter_pidfile) {
            Some(pid) => {
                terminate_and_wait(pid, Duration::from_secs(5))?;
                pidfile::remove(&adapter_pidfile);
                println!("Adapter {name} stopped");
                Ok(())
            }
            None => {
                println!("Adapter {name} was not running");
                Ok(())
            }
        },
        AdapterAction::Start => {
            if pidfile::running_pid(&config.pid_file).is_none() {
                bail!("gateway must be running to start adapters; run `clara-gateway start` first");
            }
            start_adapter_directly(config, name)
        }
        AdapterAction::Restart => {
            if let Some(pid) = pidfile::running_pid(&adapter_pidfile) {
                terminate_and_wait(pid, Duration::from_secs(5))?;
                pidfile::remove(&adapter_pidfile);
                std::thread::sleep(Duration::from_secs(1));
            }
            start_adapter_directly(config, name)
        }
    }
}

/// Spawns one adapter directly from the CLI process (as opposed to via the
/// running gateway's [`AdapterSupervisor`]): detached from this process's
/// session so it outlives the CLI invocation, with its PID recorded for
/// later `status`/`stop` calls.
fn start_adapter_directly(config: &GatewayConfig, name: &str) -> anyhow::Result<()> {
    let adapters_file: AdaptersFile = load_yaml(&config.adapters_config)?;
    let adapter = adapters_file.adapters.get(name).ok_or_else(|| {
        let available: Vec<String> = adapters_file.adapters.keys().cloned().collect();
        anyhow!("unknown adapter: {name} (available: {})", available.join(", "))
    })?;

    let (program, args) = adapter
        .module
        .split_first()
        .ok_or_else(|| anyhow!("adapter {name} has an empty module command"))?;

    let mut command = std::process::Command::new(program);
    command.args(args);
    for (key, value) in resolve_env(&adapter.env) {
        command.env(key, value);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().with_context(|| format!("spawning adapter {name}"))?;
    let pid = child.id();
    pidfile::write(&config.adapter_pid_file(name), pid)?;
    println!("Adapter {name} started (PID {pid})");
    Ok(())
}

/// Resolves `${ENV_VAR}`-shaped values against this process's environment,
/// leaving everything else untouched.
fn resolve_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(key, value)| {
            let resolved = match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
                Some(var_name) => std::env::var(var_name).unwrap_or_default(),
                None => value.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

fn terminate_and_wait(pid: u32, timeout: Duration) -> anyhow::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).context("sending SIGTERM")?;

    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if !pidfile::process_alive(pid) {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    warn!(pid, "process did not exit in time, sending SIGKILL");
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    Ok(())
}

fn cmd_logs(config: &GatewayConfig, lines: usize, follow: bool) -> anyhow::Result<()> {
    let Some(log_file) = &config.log_file else {
        bail!("no log file configured; pass --logfile when starting the gateway");
    };
    if !log_file.exists() {
        bail!("log file not found: {}", log_file.display());
    }

    let mut command = std::process::Command::new("tail");
    if follow {
        command.arg("-f");
    }
    command.arg("-n").arg(lines.to_string()).arg(log_file);
    let status = command.status().context("running tail")?;
    if !status.success() {
        bail!("tail exited with {status}");
    }
    Ok(())
}

#[derive(Default)]
struct LazySink {
    inner: OnceLock<Arc<GatewayState>>,
}

impl LazySink {
    fn set(&self, state: Arc<GatewayState>) {
        let _ = self.inner.set(state);
    }
}

#[async_trait]
impl MessageSink for LazySink {
    async fn broadcast_to_platform(&self, platform: &str, user_id: &str, channel_id: &str, content: &str) -> usize {
        match self.inner.get() {
            Some(state) => {
                <GatewayState as MessageSink>::broadcast_to_platform(state, platform, user_id, channel_id, content).await
            }
            None => 0,
        }
    }
}
