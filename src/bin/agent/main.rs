mod dom;
mod face;
mod hands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use faed_autopilot::config::{self, ReferenceSource, Timings};
use faed_autopilot::locator::{detect_layout, read_field};
use faed_autopilot::natinf::{self, SensitiveCodes};
use faed_autopilot::page::Page;
use faed_autopilot::protocol::Notifier;
use faed_autopilot::rules::{FieldValues, VALIDATED_FIELDS, validate};
use faed_autopilot::session::{self, AutomationSession};
use faed_autopilot::store::StateStore;
use faed_autopilot::MemoryPage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faed-agent", version, about = "Automates the FAED alpha-numeric control sheet")]
struct Cli {
    #[command(subcommand)]
    mode: Option<Mode>,

    #[command(flatten)]
    run: RunArgs,

    #[command(flatten)]
    reference: ReferenceArgs,
}

#[derive(Subcommand)]
enum Mode {
    /// Drive Chrome and serve the control page (default)
    Run,
    /// Validate a recorded page snapshot offline
    Check {
        #[arg(long)]
        snapshot: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, env = "FAED_CHROME_URL", default_value = "http://127.0.0.1:9222", global = true)]
    chrome_url: String,

    #[arg(long, env = "FAED_PORT", default_value_t = 3000, global = true)]
    port: u16,

    #[arg(long, env = "FAED_STATE_FILE", global = true)]
    state_file: Option<PathBuf>,

    /// Page opened when a fresh Chrome is launched
    #[arg(long, env = "FAED_TARGET_URL", global = true)]
    target_url: Option<String>,
}

#[derive(clap::Args)]
struct ReferenceArgs {
    /// Bundled sensitive NATINF list
    #[arg(long, env = "FAED_NATINF_FILE", default_value = config::DEFAULT_NATINF_FILE, global = true)]
    natinf_file: PathBuf,

    /// Fallback URL for the NATINF list
    #[arg(long, env = "FAED_NATINF_URL", global = true)]
    natinf_url: Option<String>,
}

impl ReferenceArgs {
    fn source(&self) -> ReferenceSource {
        ReferenceSource {
            path: self.natinf_file.clone(),
            relay_url: self.natinf_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let source = cli.reference.source();
    let outcome = match cli.mode {
        Some(Mode::Check { snapshot }) => check(&snapshot, source).await,
        Some(Mode::Run) | None => run(cli.run, source).await,
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs, source: ReferenceSource) -> Result<ExitCode> {
    let RunArgs {
        chrome_url,
        port,
        state_file,
        target_url,
    } = args;
    info!(version = config::VERSION, "starting FAED agent");

    let notifier = Notifier::with_capacity(64);
    let mut cmd_rx = face::start_server(port, notifier.clone()).await?;

    let profile = std::env::current_dir()?.join("agent_profile");
    let browser = tokio::task::spawn_blocking(move || {
        hands::BrowserSession::launch(&chrome_url, target_url.as_deref(), profile)
    })
    .await
    .context("browser launch panicked")??;
    let page: Arc<dyn Page> = Arc::new(dom::ChromePage::new(browser.tab.clone()));

    let store = StateStore::new(state_file.unwrap_or_else(config::default_state_file));
    info!(state_file = %store.path().display(), "persisted state");
    let session = AutomationSession::new(
        page,
        store,
        SensitiveCodes::new(source),
        notifier,
        Timings::default(),
    );

    let shutdown = CancellationToken::new();
    let watcher = tokio::spawn(session::watch(session.clone(), shutdown.clone()));

    info!("ready, waiting for commands");
    loop {
        tokio::select! {
            envelope = cmd_rx.recv() => {
                let Some(face::Envelope { command, reply }) = envelope else { break };
                let session = session.clone();
                tokio::spawn(async move {
                    let response = session.handle(command).await;
                    if reply.send(response).is_err() {
                        warn!("caller went away before the answer");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    shutdown.cancel();
    watcher.await.context("page watcher panicked")?;
    drop(browser);
    Ok(ExitCode::SUCCESS)
}

/// Offline verification pass. Reports and exits non-zero on validation errors.
async fn check(snapshot: &std::path::Path, source: ReferenceSource) -> Result<ExitCode> {
    let page = MemoryPage::load_snapshot(snapshot)
        .with_context(|| format!("loading snapshot {}", snapshot.display()))?;

    let layout = detect_layout(&page).await;
    let mut values = FieldValues::default();
    for field in VALIDATED_FIELDS {
        values.set(field, read_field(&page, field, layout).await);
    }
    let result = validate(&values);
    let verdict = natinf::evaluate(&page, layout, &SensitiveCodes::new(source)).await;

    println!("layout: {layout:?}");
    for (field, status) in &result.per_field_status {
        println!("  {:<24} {:<8} {:?}", field.label(), format!("{status:?}"), values.get(*field));
    }
    if result.ok() {
        println!("no validation errors");
    } else {
        println!("{} error(s):", result.errors.len());
        for (i, message) in result.errors.iter().enumerate() {
            println!("  {}. {message}", i + 1);
        }
    }
    if verdict.should_write {
        println!("sensitive NATINF: {}", verdict.codes.join(", "));
    }

    Ok(if result.ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
