//! Configuration loading: typed env-overridable gateway settings, and YAML
//! schemas for `adapters.yaml`, `hooks.yaml`, and `scheduler.yaml`.

mod env;
mod schema;

pub use env::GatewayConfig;
pub use schema::{
    AdapterConfig, AdaptersFile, HookConfig, HooksFile, RestartPolicy, SchedulerFile,
    TaskConfig, TaskKind, load_yaml,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
