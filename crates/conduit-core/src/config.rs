//! Bridge configuration.

use std::path::PathBuf;

use crate::codex::types::ClientInfo;
use crate::codex::CodexConfig;

pub const DEFAULT_SANDBOX: &str = "workspace-write";
pub const DEFAULT_APPROVAL_POLICY: &str = "on-request";

/// Everything needed to start a bridge.
///
/// `sandbox` and `approval_policy` are sent verbatim with every
/// `thread/start`; the bridge does not interpret them.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub codex: CodexConfig,
    pub sandbox: String,
    pub approval_policy: String,
    /// Directory for the wire log. `None` disables it.
    pub log_dir: Option<PathBuf>,
    /// Log file stem. Defaults to a random id.
    pub log_id: Option<String>,
    pub client_info: ClientInfo,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            codex: CodexConfig::default(),
            sandbox: DEFAULT_SANDBOX.to_string(),
            approval_policy: DEFAULT_APPROVAL_POLICY.to_string(),
            log_dir: None,
            log_id: None,
            client_info: ClientInfo::default(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary_path(mut self, path: impl Into<String>) -> Self {
        self.codex.binary_path = path.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.codex.model = Some(model.into());
        self
    }

    pub fn shell_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.codex.shell_prefix = Some(prefix.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.codex.working_dir = Some(dir.into());
        self
    }

    pub fn sandbox(mut self, sandbox: impl Into<String>) -> Self {
        self.sandbox = sandbox.into();
        self
    }

    pub fn approval_policy(mut self, policy: impl Into<String>) -> Self {
        self.approval_policy = policy.into();
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn log_id(mut self, id: impl Into<String>) -> Self {
        self.log_id = Some(id.into());
        self
    }

    pub fn client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }

    /// The configured model, if any.
    pub fn model_name(&self) -> Option<&str> {
        self.codex.model.as_deref().filter(|m| !m.is_empty())
    }
}
