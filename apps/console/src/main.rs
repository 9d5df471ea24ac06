use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, load_settings_from},
    page::{MemoryPage, PageHost},
    transport::{HttpTransport, Transport},
    ActionHandler, CallOutcome, DispatchEvent, DispatchRuntime,
};
use shared::{
    action::{ActionEvent, ActionParams},
    domain::{ControlSnapshot, ControlValue, FilePayload},
};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Cli {
    /// Settings file; `dispatch.toml` in the working directory is used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    document: Option<String>,
    /// Scalar control on the simulated page, as `id=value`.
    #[arg(long = "control", value_parser = parse_pair)]
    controls: Vec<(String, String)>,
    /// File control on the simulated page, as `id=path`.
    #[arg(long = "file", value_parser = parse_pair)]
    files: Vec<(String, String)>,
    /// Empty element on the simulated page that responses can fill.
    #[arg(long = "element")]
    elements: Vec<String>,
    /// Milliseconds to wait for follow-up calls after the main one finishes.
    #[arg(long, default_value_t = 500)]
    settle_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Post {
        url: String,
        #[arg(long = "panel")]
        panels: Vec<String>,
        #[arg(long = "reference")]
        references: Vec<String>,
        #[arg(long)]
        command: Option<String>,
        #[arg(long)]
        trigger: Option<String>,
        #[arg(long)]
        sync: bool,
        #[arg(long)]
        debounce: bool,
    },
    Command {
        url: String,
        panel: String,
        command: String,
        #[arg(long = "refresh")]
        refresh_panels: Vec<String>,
    },
    OpenPath {
        url: String,
    },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected id=value, got '{raw}'"))
}

fn build_page(cli: &Cli) -> Result<MemoryPage> {
    let page = MemoryPage::new();
    for id in &cli.elements {
        page.insert_element(id.clone(), "");
    }
    for (id, value) in &cli.controls {
        page.insert_control(ControlSnapshot::scalar(id.clone(), value.clone()));
    }
    for (id, path) in &cli.files {
        let path = PathBuf::from(path);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read upload '{}'", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.clone());
        page.insert_control(ControlSnapshot::new(
            id.clone(),
            ControlValue::Files(vec![FilePayload {
                name,
                mime_type: None,
                bytes,
            }]),
        ));
    }
    Ok(page)
}

async fn settle(events: &mut broadcast::Receiver<DispatchEvent>, quiet: Duration) {
    while let Ok(Ok(event)) = tokio::time::timeout(quiet, events.recv()).await {
        info!(?event, "console: follow-up event");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(server_url) = &cli.server_url {
        settings.server_url = Some(server_url.clone());
    }
    if let Some(document) = &cli.document {
        settings.document_path = document.clone();
    }

    let page = Arc::new(build_page(&cli)?);
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(settings.server_url.as_deref())?);
    let host: Arc<dyn PageHost> = page.clone();
    let runtime = DispatchRuntime::new(settings, transport, host);
    let mut events = runtime.subscribe_events();

    let outcome = match cli.command {
        Command::Post {
            url,
            panels,
            references,
            command,
            trigger,
            sync,
            debounce,
        } => {
            let mut params = runtime
                .new_params(url)
                .await
                .with_panels(panels)
                .with_references(references);
            params.command = command;
            params.debounced = debounce;
            let handler = if sync {
                ActionHandler::Submit
            } else {
                ActionHandler::Post
            };
            runtime
                .handle(handler, ActionEvent::new(trigger, params))
                .await
        }
        Command::Command {
            url,
            panel,
            command,
            refresh_panels,
        } => {
            let mut params = ActionParams::default();
            params.command_url = Some(url);
            params.target_panel = Some(panel);
            params.target_command = Some(command);
            params.refresh_panels = refresh_panels;
            runtime
                .handle(ActionHandler::PostCommand, ActionEvent::new(None, params))
                .await
        }
        Command::OpenPath { url } => {
            runtime.post_to_path(url);
            None
        }
    };

    match &outcome {
        Some(CallOutcome::Completed(report)) => info!(
            applied = report.applied,
            skipped = report.skipped.len(),
            "console: call completed"
        ),
        Some(CallOutcome::Failed(err)) => warn!(error = %err, "console: call failed"),
        Some(other) => warn!(?other, "console: call not sent"),
        None => {}
    }

    settle(&mut events, Duration::from_millis(cli.settle_ms)).await;
    runtime.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&page.snapshot())?);
    Ok(())
}
