//! Launch configuration for `codex app-server`.

use crate::spawn::SpawnConfig;

pub const DEFAULT_BINARY: &str = "codex";

/// How to launch the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexConfig {
    pub binary_path: String,
    /// Passed as a `-c model="..."` override.
    pub model: Option<String>,
    pub shell_prefix: Option<String>,
    pub working_dir: Option<String>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            binary_path: DEFAULT_BINARY.to_string(),
            model: None,
            shell_prefix: None,
            working_dir: None,
        }
    }
}

impl CodexConfig {
    /// Build a SpawnConfig for the app-server subcommand.
    pub fn build(&self) -> SpawnConfig {
        let mut args: Vec<String> = vec!["app-server".to_string()];

        if let Some(model) = self.model.as_deref().filter(|m| !m.is_empty()) {
            args.push("-c".to_string());
            args.push(format!("model=\"{}\"", model));
        }

        let mut config = SpawnConfig::new(&self.binary_path, args);

        if let Some(ref shell) = self.shell_prefix {
            config = config.shell_prefix(shell);
        }
        if let Some(ref dir) = self.working_dir {
            config = config.working_dir(dir);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runs_codex_app_server() {
        let spawn = CodexConfig::default().build();
        assert_eq!(spawn.binary_path, "codex");
        assert_eq!(spawn.args, vec!["app-server".to_string()]);
        assert!(spawn.shell_prefix.is_none());
    }

    #[test]
    fn model_becomes_config_override() {
        let config = CodexConfig {
            binary_path: "/usr/local/bin/codex".to_string(),
            model: Some("gpt-5-codex".to_string()),
            ..CodexConfig::default()
        };

        let spawn = config.build();
        assert_eq!(spawn.binary_path, "/usr/local/bin/codex");
        assert_eq!(
            spawn.args,
            vec![
                "app-server".to_string(),
                "-c".to_string(),
                "model=\"gpt-5-codex\"".to_string()
            ]
        );
    }

    #[test]
    fn empty_model_is_ignored() {
        let config = CodexConfig {
            model: Some(String::new()),
            ..CodexConfig::default()
        };
        assert_eq!(config.build().args.len(), 1);
    }

    #[test]
    fn shell_prefix_and_working_dir_pass_through() {
        let config = CodexConfig {
            shell_prefix: Some("/bin/zsh -l -c".to_string()),
            working_dir: Some("/tmp/project".to_string()),
            ..CodexConfig::default()
        };
        let spawn = config.build();
        assert_eq!(spawn.shell_prefix.as_deref(), Some("/bin/zsh -l -c"));
        assert_eq!(spawn.working_dir.as_deref(), Some("/tmp/project"));
    }
}
