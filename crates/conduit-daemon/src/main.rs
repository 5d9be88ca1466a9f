//! `conduit`: run one prompt through `codex app-server` from the shell.
//!
//! Starts a thread in the working directory, sends the prompt and prints every
//! domain event as a JSON line on stdout until the turn completes. Diagnostics
//! go to stderr through `RUST_LOG`.
//!
//!   conduit "explain this repository"
//!   conduit --auto-approve --model gpt-5-codex "fix the failing test"

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use conduit_core::config::{DEFAULT_APPROVAL_POLICY, DEFAULT_SANDBOX};
use conduit_core::{
    ApprovalOptions, Bridge, BridgeConfig, BridgeError, EventPayload, ThreadContext,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

#[derive(Parser, Debug)]
#[command(name = "conduit", version)]
#[command(about = "Drive a Codex app-server and stream its events as JSON lines")]
struct Args {
    /// Message to send as the first turn
    prompt: String,

    /// Path to the codex binary
    #[arg(long, env = "CONDUIT_CODEX_PATH", default_value = "codex")]
    codex_path: String,

    /// Model override passed to the app-server
    #[arg(long, env = "CONDUIT_MODEL")]
    model: Option<String>,

    /// Workspace root for the thread (defaults to the current directory)
    #[arg(long, env = "CONDUIT_CWD")]
    cwd: Option<PathBuf>,

    /// Session id stamped on events (defaults to the workspace path)
    #[arg(long, env = "CONDUIT_SESSION")]
    session: Option<String>,

    /// Directory for the raw wire log
    #[arg(long, env = "CONDUIT_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long, env = "CONDUIT_SANDBOX", default_value = DEFAULT_SANDBOX)]
    sandbox: String,

    #[arg(long, env = "CONDUIT_APPROVAL_POLICY", default_value = DEFAULT_APPROVAL_POLICY)]
    approval_policy: String,

    /// Custom shell prefix, e.g. "/bin/zsh -l -c"
    #[arg(long, env = "CONDUIT_SHELL_PREFIX")]
    shell_prefix: Option<String>,

    /// Approve every request instead of declining it
    #[arg(long, env = "CONDUIT_AUTO_APPROVE")]
    auto_approve: bool,

    /// Local files to attach to the prompt
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,
}

/// How the prompt's turn ended.
enum Outcome {
    Completed {
        turn_id: String,
        status: String,
        error: Option<String>,
    },
    Lost(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("conduit: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, BridgeError> {
    let cwd = match args.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|e| BridgeError::Spawn(e.to_string()))?,
    };

    let mut config = BridgeConfig::new()
        .binary_path(args.codex_path)
        .sandbox(args.sandbox)
        .approval_policy(args.approval_policy)
        .working_dir(cwd.to_string_lossy());
    if let Some(model) = args.model {
        config = config.model(model);
    }
    if let Some(dir) = args.log_dir {
        config = config.log_dir(dir);
    }
    if let Some(prefix) = args.shell_prefix {
        config = config.shell_prefix(prefix);
    }

    let bridge = Bridge::spawn(config)?;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let decision = if args.auto_approve { "approve" } else { "decline" };
    let responder = bridge.clone();

    let _printer = bridge.on_event(move |event| {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(err) => log::warn!("Failed to serialize {}: {}", event.type_name(), err),
        }

        match &event.payload {
            EventPayload::ApprovalRequest { approval } => {
                log::info!("Answering '{}' with {}", approval.title, decision);
                responder.respond_approval(&approval.id, decision, ApprovalOptions::default());
            }
            EventPayload::TurnCompleted {
                turn_id,
                status,
                error,
                ..
            } => {
                let _ = done_tx.send(Outcome::Completed {
                    turn_id: turn_id.clone(),
                    status: status.clone(),
                    error: error.clone(),
                });
            }
            EventPayload::Error {
                message,
                recoverable: true,
                thread_id: None,
                turn_id: None,
            } => {
                let _ = done_tx.send(Outcome::Lost(message.clone()));
            }
            _ => {}
        }
    });

    bridge.wait_ready().await?;
    let session_id = args
        .session
        .unwrap_or_else(|| cwd.display().to_string());
    let thread_id = bridge
        .create_thread(ThreadContext::new(session_id, cwd.clone()))
        .await?;
    let turn_id = bridge
        .send_message(&thread_id, &args.prompt, &args.attachments)
        .await?;

    let finished = tokio::select! {
        outcome = wait_for_turn(&mut done_rx, &turn_id) => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            log::warn!("Interrupted, cancelling turn {}", turn_id);
            bridge.cancel(&turn_id);
            wait_for_turn(&mut done_rx, &turn_id).await
        }
    };
    bridge.shutdown();

    match outcome {
        Outcome::Completed { status, error, .. } if status == "completed" => {
            if let Some(error) = error {
                log::warn!("Turn completed with error: {}", error);
            }
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Completed { status, error, .. } => {
            eprintln!(
                "conduit: turn {}: {}",
                status,
                error.unwrap_or_else(|| "no details".to_string())
            );
            Ok(ExitCode::FAILURE)
        }
        Outcome::Lost(message) => Err(BridgeError::ProcessExited(message)),
    }
}

async fn wait_for_turn(events: &mut UnboundedReceiver<Outcome>, turn_id: &str) -> Outcome {
    while let Some(outcome) = events.recv().await {
        match &outcome {
            Outcome::Completed { turn_id: id, .. } if id != turn_id => continue,
            _ => return outcome,
        }
    }
    Outcome::Lost("event stream ended".to_string())
}
