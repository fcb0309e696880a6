//! jarvis - ask a locally hosted LLM from the terminal.
//!
//! Sends a prompt to an OpenAI-compatible inference server (LM Studio by
//! default), streams the answer back as plain text or rendered markdown, and
//! optionally keeps the exchange in a named conversation for later.

mod config;
mod conversation;
mod error;
mod health;
mod llm;
mod protocol;
mod render;
mod stream;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{ArgGroup, Parser};
use config::ConfigFile;
use conversation::{ConversationStore, TranscriptSink};
use llm::LlmClient;
use render::{OutputMode, TerminalRenderer};
use std::path::PathBuf;
use stream::ResponseProcessor;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for a failed health check or an operator interrupt.
const FAILURE_EXIT_CODE: i32 = 1;

fn interrupt_notice() -> &'static str {
    "\nInterrupted"
}

#[derive(Parser)]
#[command(name = "jarvis")]
#[command(author, version, about = "Ask questions, and you shall receive answers")]
#[command(long_about = "Ask a locally hosted LLM from the terminal.\n\n\
Every call is stateless unless --save-chat is given. Saved conversations get a \
unique id; pass it back with --context to continue where you left off.")]
#[command(group(ArgGroup::new("action").required(true).args(["prompt", "list"])))]
struct Cli {
    /// Prompt Jarvis, ask anything
    #[arg(value_name = "PROMPT")]
    prompt: Option<String>,

    /// List saved conversations
    #[arg(short = 'l', long)]
    list: bool,

    /// Display server and LLM status
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Stream the response as plain text instead of rendered markdown
    #[arg(short = 'p', long)]
    plain: bool,

    /// Save this exchange to the conversation
    #[arg(short = 's', long)]
    save_chat: bool,

    /// Continue a saved conversation
    #[arg(short = 'c', long, value_name = "ID")]
    context: Option<String>,

    /// Use this configuration file instead of the one beside the executable
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tokio::select! {
        result = run(cli) => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("{}", interrupt_notice());
            std::process::exit(FAILURE_EXIT_CODE);
        }
    }
}

/// Status goes to stderr so stdout carries only the answer.
fn init_logging(verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jarvis={},reqwest=warn", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => ConfigFile::default_path()?,
    };
    let config_file = ConfigFile::load(config_path)?;
    debug!("Loaded configuration from {}", config_file.path().display());

    if cli.list {
        return handle_list(&config_file);
    }
    let prompt = cli.prompt.clone().context("A prompt is required")?;
    handle_prompt(cli, prompt, config_file).await
}

/// Print the ids of saved conversations, one per line.
fn handle_list(config_file: &ConfigFile) -> Result<()> {
    let store = ConversationStore::new(config_file.config.conversations_dir());
    let ids = store.list()?;
    if ids.is_empty() {
        info!("No saved conversations in {}", store.dir().display());
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

/// Gate on server health, send the prompt and stream the answer.
async fn handle_prompt(cli: Cli, prompt: String, mut config_file: ConfigFile) -> Result<()> {
    let client = LlmClient::new(&config_file.config);

    let now = Local::now().naive_local();
    if !health::is_llm_online(&mut config_file, &client, now).await? {
        eprintln!(
            "{} is not available. Is the server running with a model loaded?",
            client.model()
        );
        std::process::exit(FAILURE_EXIT_CODE);
    }

    info!("Starting up...");

    let store = ConversationStore::new(config_file.config.conversations_dir());
    let conversation_id = cli
        .context
        .clone()
        .unwrap_or_else(conversation::new_conversation_id);
    let history = match &cli.context {
        Some(id) => store.load_history(id)?.unwrap_or_else(|| {
            warn!("Conversation {} not found, starting it fresh", id);
            String::new()
        }),
        None => String::new(),
    };
    info!(
        "Conversation {} ({} characters of history)",
        conversation_id,
        history.chars().count()
    );

    let result = client.complete(&history, &prompt).await?;

    let mode = if cli.plain {
        OutputMode::Plain
    } else {
        OutputMode::Formatted
    };
    let mut renderer = TerminalRenderer::stdout(mode);
    let mut log = if cli.save_chat {
        Some(store.log(&conversation_id)?)
    } else {
        None
    };
    let transcript = log.as_mut().map(|log| log as &mut dyn TranscriptSink);

    ResponseProcessor::new(&mut renderer, transcript)
        .process(result)
        .await?;

    if needs_trailing_newline(mode, atty::is(atty::Stream::Stdout)) {
        println!();
    }
    if let Some(log) = &log {
        if cli.context.is_none() {
            eprintln!("Saved as conversation {}", log.id());
        }
    }

    Ok(())
}

/// Plain output is written byte for byte; the shell prompt only gets a fresh
/// line on an interactive terminal.
fn needs_trailing_newline(mode: OutputMode, stdout_is_tty: bool) -> bool {
    mode == OutputMode::Plain && stdout_is_tty
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_prompt_with_flags() {
        let cli = Cli::try_parse_from(["jarvis", "how are you", "-s", "-p", "-c", "abc"]).unwrap();
        assert_eq!(cli.prompt.as_deref(), Some("how are you"));
        assert!(cli.save_chat);
        assert!(cli.plain);
        assert_eq!(cli.context.as_deref(), Some("abc"));
        assert!(!cli.list);
    }

    #[test]
    fn test_list_alone() {
        let cli = Cli::try_parse_from(["jarvis", "--list"]).unwrap();
        assert!(cli.list);
        assert!(cli.prompt.is_none());
    }

    #[test]
    fn test_prompt_or_list_is_required() {
        assert!(Cli::try_parse_from(["jarvis"]).is_err());
        assert!(Cli::try_parse_from(["jarvis", "-v"]).is_err());
    }

    #[test]
    fn test_prompt_and_list_conflict() {
        assert!(Cli::try_parse_from(["jarvis", "hello", "--list"]).is_err());
    }

    #[test]
    fn test_piped_plain_output_has_no_trailing_newline() {
        assert!(!needs_trailing_newline(OutputMode::Plain, false));
        assert!(needs_trailing_newline(OutputMode::Plain, true));
        assert!(!needs_trailing_newline(OutputMode::Formatted, true));
        assert!(!needs_trailing_newline(OutputMode::Formatted, false));
    }

    #[test]
    fn test_interrupt_exits_with_failure() {
        assert_eq!(FAILURE_EXIT_CODE, 1);
        assert_eq!(interrupt_notice().trim(), "Interrupted");
        assert!(interrupt_notice().starts_with('\n'));
    }
}
