/// Per-adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disabled,
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Disabled => "disabled",
            AdapterState::Stopped => "stopped",
            AdapterState::Starting => "starting",
            AdapterState::Running => "running",
            AdapterState::Stopping => "stopping",
            AdapterState::Failed => "failed",
        }
    }
}
