use std::sync::Arc;

use practice_terminal::code::{CodeProvider, FileCode, SharedCode};
use practice_terminal::commands::CommandPolicy;
use practice_terminal::config::{Config, TerminalMode};
use practice_terminal::output_log::{default_welcome, LogEvent, OutputLog};
use practice_terminal::session::{Key, TerminalSession};
use practice_terminal::transport::duplex::DuplexTransport;
use practice_terminal::transport::http::HttpTransport;
use practice_terminal::transport::Transport;
use practice_terminal::{TerminalActor, TerminalArguments, TerminalMsg};
use ractor::{Actor, ActorRef};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "practice_terminal=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    info!(mode = ?config.mode, api_base = %config.api_base, "practice terminal starting");

    let code: Arc<dyn CodeProvider> = match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "Running code from file");
            Arc::new(FileCode::new(path, config.language.clone()))
        }
        None => Arc::new(SharedCode::new(
            String::new(),
            config.language.clone().unwrap_or_else(|| "python".to_string()),
        )),
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let log = OutputLog::new(default_welcome(), config.max_log_lines);

    let session = match config.mode {
        TerminalMode::Local => {
            let transport = Arc::new(HttpTransport::new(
                config.api_base.clone(),
                config.run_timeout,
                events_tx,
            ));
            TerminalSession::new(transport, code, log)
        }
        TerminalMode::Command => {
            let transport = Arc::new(HttpTransport::new(
                config.api_base.clone(),
                config.run_timeout,
                events_tx,
            ));
            TerminalSession::new(transport.clone(), code, log).with_command_lane(
                CommandPolicy::new(config.allowed_commands.clone()),
                transport,
            )
        }
        TerminalMode::Live => {
            let url = DuplexTransport::terminal_url(&config.api_base, Uuid::new_v4());
            let transport: Arc<dyn Transport> = Arc::new(DuplexTransport::connect(
                url,
                config.reconnect.clone(),
                events_tx,
            ));
            TerminalSession::new(transport, code, log)
        }
    }
    .with_locked(config.start_locked);

    let (actor, handle) = Actor::spawn(
        Some(format!("terminal:{}", Uuid::new_v4())),
        TerminalActor,
        TerminalArguments {
            session,
            transport_events: events_rx,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to spawn terminal actor: {e}"))?;

    let snapshot = ractor::call!(actor, |reply| TerminalMsg::Snapshot { reply })
        .map_err(|e| anyhow::anyhow!("Failed to read terminal snapshot: {e}"))?;
    for line in &snapshot.lines {
        println!("{}", line.text);
    }

    let output = ractor::call!(actor, |reply| TerminalMsg::SubscribeOutput { reply })
        .map_err(|e| anyhow::anyhow!("Failed to subscribe to terminal output: {e}"))?;
    let renderer = tokio::spawn(render(output));

    read_stdin(&actor).await?;

    actor.stop(None);
    let _ = handle.await;
    renderer.abort();
    Ok(())
}

async fn render(mut output: broadcast::Receiver<LogEvent>) {
    loop {
        match output.recv().await {
            Ok(LogEvent::Appended(line)) => println!("{}", line.text),
            Ok(LogEvent::Cleared) => print!("\x1b[2J\x1b[H"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Renderer fell behind terminal output");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Stdin lines starting with `:` are controls; anything else is typed into
/// the terminal followed by Enter.
async fn read_stdin(actor: &ActorRef<TerminalMsg>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let control = match line.trim() {
            ":quit" => break,
            ":run" => Some(TerminalMsg::StartRun),
            ":stop" => Some(TerminalMsg::StopRun),
            ":shell" => Some(TerminalMsg::StartShell),
            ":lock" => Some(TerminalMsg::SetLock(true)),
            ":unlock" => Some(TerminalMsg::SetLock(false)),
            ":clear" => Some(TerminalMsg::Clear),
            _ => None,
        };

        if let Some(msg) = control {
            send(actor, msg)?;
            continue;
        }
        for c in line.chars() {
            send(actor, TerminalMsg::Key(Key::Char(c)))?;
        }
        send(actor, TerminalMsg::Key(Key::Enter))?;
    }

    Ok(())
}

fn send(actor: &ActorRef<TerminalMsg>, msg: TerminalMsg) -> anyhow::Result<()> {
    actor
        .cast(msg)
        .map_err(|e| anyhow::anyhow!("Terminal actor unavailable: {e}"))
}
