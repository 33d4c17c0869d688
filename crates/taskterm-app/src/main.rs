use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use taskterm_client::{ClientConfig, SessionService};
use taskterm_terminal::{ContainerHandle, MemoryTerminalFactory};
use taskterm_types::SessionDescriptor;

/// Interactive exec session into a running task container.
#[derive(Parser, Debug)]
#[command(name = "taskterm", version, about)]
struct Cli {
    /// Workflow the task belongs to
    workflow: String,

    /// Task to exec into (also used as the session key)
    task: String,

    /// Shell command to run in the container
    #[arg(long, default_value = "/bin/bash")]
    command: String,

    /// Exec backend base URL
    #[arg(long, env = "TASKTERM_BASE_URL")]
    base_url: String,

    /// Bearer token for the exec backend
    #[arg(long, env = "TASKTERM_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Terminal size as COLSxROWS
    #[arg(long, default_value = "80x24")]
    size: String,
}

fn parse_size(size: &str) -> Result<(u16, u16)> {
    let (cols, rows) = size
        .split_once('x')
        .context("size must look like 80x24")?;
    Ok((cols.parse()?, rows.parse()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (cols, rows) = parse_size(&cli.size)?;

    let mut config = ClientConfig::new(cli.base_url);
    if let Some(token) = cli.auth_token {
        config = config.with_auth_token(token);
    }

    let factory = Arc::new(MemoryTerminalFactory::new());
    let service = SessionService::new(config, factory.clone())?;

    let key = cli.task.clone();
    let descriptor = SessionDescriptor::new(cli.workflow, cli.task, cli.command);
    service
        .open_session(&key, descriptor, ContainerHandle::new(cols, rows))
        .await?;
    info!(%key, "session opened");

    let _subscription = service.subscribe(|snapshot| {
        for session in snapshot {
            info!(key = %session.key, status = %session.status, "session status");
        }
    });

    // Mirror new terminal output to stdout.
    let probe = factory
        .last_probe()
        .context("terminal factory produced no terminal")?;
    let mirror = tokio::spawn(async move {
        let mut cursor = 0usize;
        let mut partial = String::new();
        loop {
            let (lines, next_cursor, current_partial) = probe.lines_after(cursor);
            if !lines.is_empty() || current_partial != partial {
                let mut stdout = std::io::stdout();
                for line in &lines {
                    let _ = write!(stdout, "\r{line}\r\n");
                }
                // Redraw the unfinished line (prompt, progress bar) in
                // place.
                let _ = write!(stdout, "\r{current_partial}");
                let _ = stdout.flush();
                cursor = next_cursor;
                partial = current_partial;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    // Forward stdin lines as keystrokes until EOF.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        service.send_input(&key, format!("{line}\n").as_bytes());
    }

    mirror.abort();
    service.disconnect(&key);
    service.dispose_all();
    Ok(())
}
