//! `appforge agent` — Interactive plan/build/test session.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use appforge_agent::{AgentLoop, LoopSettings, RunOutcome, Session};
use appforge_config::AppConfig;
use appforge_core::agent::{Mode, Phase};
use appforge_core::diagnostics::ErrorAggregator;
use appforge_core::error::ProviderError;
use appforge_core::event::{AgentEvent, NoticeLevel, ToolCallStatus};
use appforge_providers::OpenAiCompatProvider;
use appforge_tools::{CommandPolicy, Workspace, default_registry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

pub struct AgentArgs {
    pub project: Option<PathBuf>,
    pub mode: Option<Mode>,
    pub message: Option<String>,
    pub auto_test: Option<bool>,
}

/// One line of user input, interpreted against the session phase.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Empty,
    Exit,
    Approve,
    Changes(String),
    Test,
    Skip,
    Mode(String),
    Errors,
    Reset,
    Message(String),
    Unknown(String),
}

fn parse_input(line: &str, phase: Phase) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Input::Exit;
    }

    let Some(command) = line.strip_prefix('/') else {
        // Plain text while a plan is pending review is feedback on it.
        return if phase == Phase::AwaitingApproval {
            Input::Changes(line.to_string())
        } else {
            Input::Message(line.to_string())
        };
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name {
        "approve" => Input::Approve,
        "changes" if !rest.is_empty() => Input::Changes(rest.to_string()),
        "test" => Input::Test,
        "skip" => Input::Skip,
        "mode" if !rest.is_empty() => Input::Mode(rest.to_string()),
        "errors" => Input::Errors,
        "reset" => Input::Reset,
        "exit" | "quit" => Input::Exit,
        _ => Input::Unknown(line.to_string()),
    }
}

/// The stderr line for an event, if it has one. Streamed text is printed
/// separately.
fn status_line(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::PhaseChanged { phase } => Some(format!("  [phase: {phase}]")),
        AgentEvent::ModeChanged { mode } => Some(format!("  [mode: {mode}]")),
        AgentEvent::ToolCallUpdated {
            name,
            status,
            summary,
            ..
        } => {
            let summary = summary
                .as_deref()
                .and_then(|s| s.lines().next())
                .unwrap_or_default();
            Some(match status {
                ToolCallStatus::Pending => format!("  ⚙ {name}..."),
                ToolCallStatus::Succeeded => format!("  ✓ {name}: {summary}"),
                ToolCallStatus::Failed => format!("  ✗ {name}: {summary}"),
            })
        }
        AgentEvent::Notice { level, text } => Some(match level {
            NoticeLevel::Info => format!("  ℹ {text}"),
            NoticeLevel::Warning => format!("  ⚠ {text}"),
            NoticeLevel::Fatal => format!("  ❌ {text}"),
        }),
        AgentEvent::TaskCompleted { summary } => Some(format!("  🎉 {summary}")),
        AgentEvent::AssistantStarted { .. }
        | AgentEvent::TextDelta { .. }
        | AgentEvent::AssistantFinished { .. }
        | AgentEvent::MessageAppended { .. } => None,
    }
}

/// What to tell the user once a loop invocation returns.
fn next_step_hint(phase: Phase, outcome: Option<RunOutcome>) -> Option<&'static str> {
    match phase {
        Phase::AwaitingApproval => {
            Some("Plan ready. Type /approve to build it, or describe the changes you want.")
        }
        Phase::AwaitingTestApproval => Some("Build finished. Type /test to run QA or /skip."),
        Phase::Done => Some("Done. Send another message to keep going."),
        _ => match outcome {
            Some(RunOutcome::Stalled) | Some(RunOutcome::IterationCap) => {
                Some("The agent paused. Send a message to continue.")
            }
            _ => None,
        },
    }
}

fn project_dir(args: &AgentArgs, config: &AppConfig) -> std::io::Result<PathBuf> {
    match args.project.clone().or_else(|| config.workspace.root.clone()) {
        Some(dir) => Ok(dir),
        None => std::env::current_dir(),
    }
}

fn project_id(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

fn print_setup_instructions() {
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    APPFORGE_API_KEY=...     (generic)");
    eprintln!("    OPENROUTER_API_KEY=...   (OpenRouter)");
    eprintln!("    OPENAI_API_KEY=...       (OpenAI direct)");
    eprintln!();
    eprintln!("  Or add api_key to your config file:");
    eprintln!("    {}", AppConfig::config_path().display());
    eprintln!();
    eprintln!("  Local endpoints (http://localhost...) need no key.");
    eprintln!();
}

pub async fn run(args: AgentArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = OpenAiCompatProvider::from_config(&config).inspect_err(|e| {
        if matches!(e, ProviderError::NotConfigured(_)) {
            print_setup_instructions();
        }
    })?;

    let dir = project_dir(&args, &config)?;
    std::fs::create_dir_all(&dir)?;
    let workspace = Workspace::new(&dir)?;

    let errors = Arc::new(ErrorAggregator::new());
    let policy = CommandPolicy::new(
        config.workspace.blocked_commands.clone(),
        Duration::from_secs(config.workspace.command_timeout_secs),
    );
    let tools = Arc::new(default_registry(workspace.clone(), errors.clone(), policy));
    let agent = AgentLoop::new(Arc::new(provider), tools.clone(), config.provider.model_config())
        .with_settings(LoopSettings::from_config(&config.agent));

    let session = Session::new(project_id(workspace.root()), errors);
    session.set_mode(args.mode.unwrap_or(config.agent.mode));
    session.set_auto_test(args.auto_test.unwrap_or(config.agent.auto_test));

    let renderer = tokio::spawn(render_events(session.clone()));

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          AppForge Agent — Interactive          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Project:   {}", workspace.root().display());
    println!("  Provider:  {} ({})", config.provider.name, config.provider.base_url);
    println!("  Model:     {}", config.provider.model);
    println!("  Mode:      {}", session.mode());
    println!("  Tools:     {}", tools.names().join(", "));
    println!();
    println!("  Commands: /approve  /changes <text>  /test  /skip  /mode <m>  /errors  /reset  exit");
    println!("  Ctrl+C stops the agent while it works.");
    println!();

    if let Some(message) = args.message {
        let outcome = drive(&agent, &session, agent.run(&session, &message)).await;
        report(&session, outcome);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_input(&line, session.phase()) {
            Input::Empty => {}
            Input::Exit => break,
            Input::Message(text) => {
                let outcome = drive(&agent, &session, agent.run(&session, &text)).await;
                report(&session, outcome);
            }
            Input::Approve => {
                match drive(&agent, &session, agent.approve_plan(&session)).await {
                    Some(Err(e)) => eprintln!("  [Error] {e}"),
                    other => report(&session, other.and_then(Result::ok)),
                }
            }
            Input::Changes(feedback) => {
                match drive(&agent, &session, agent.request_changes(&session, &feedback)).await {
                    Some(Err(e)) => eprintln!("  [Error] {e}"),
                    other => report(&session, other.and_then(Result::ok)),
                }
            }
            Input::Test => match drive(&agent, &session, agent.approve_tests(&session)).await {
                Some(Err(e)) => eprintln!("  [Error] {e}"),
                other => report(&session, other.and_then(Result::ok)),
            },
            Input::Skip => match agent.skip_tests(&session) {
                Ok(()) => report(&session, None),
                Err(e) => eprintln!("  [Error] {e}"),
            },
            Input::Mode(mode) => match mode.parse::<Mode>() {
                Ok(mode) => session.set_mode(mode),
                Err(e) => eprintln!("  [Error] {e}"),
            },
            Input::Errors => println!("{}", session.errors().report()),
            Input::Reset => {
                session.reset();
                session.errors().clear();
                println!("  Conversation cleared.");
            }
            Input::Unknown(text) => eprintln!("  Unknown command: {text}"),
        }
    }

    agent.stop(&session);
    renderer.abort();
    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

/// Await a loop invocation; Ctrl+C stops the loop and yields `None`.
async fn drive<F, T>(agent: &AgentLoop, session: &Session, work: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        result = work => Some(result),
        _ = tokio::signal::ctrl_c() => {
            agent.stop(session);
            eprintln!();
            eprintln!("  [Stopped]");
            None
        }
    }
}

fn report(session: &Session, outcome: Option<RunOutcome>) {
    let phase = session.phase();
    if phase == Phase::Error
        && let Some(error) = session.last_error()
    {
        eprintln!("  [Error] {error}");
    }
    if let Some(hint) = next_step_hint(phase, outcome) {
        println!();
        println!("  {hint}");
    }
}

fn prompt() -> std::io::Result<()> {
    print!("\n  You > ");
    std::io::stdout().flush()
}

async fn render_events(session: Session) {
    let mut rx = session.subscribe();
    let mut stdout = std::io::stdout();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Renderer lagged behind agent events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event.as_ref() {
            AgentEvent::AssistantStarted { .. } => {
                let _ = write!(stdout, "\n  Assistant > ");
                let _ = stdout.flush();
            }
            AgentEvent::TextDelta { text, .. } => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            AgentEvent::AssistantFinished { .. } => {
                let _ = writeln!(stdout);
            }
            other => {
                if let Some(line) = status_line(other) {
                    eprintln!("{line}");
                }
            }
        }
    }
}
