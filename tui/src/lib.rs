// Forbid accidental stdout/stderr writes in the *library* portion of the TUI.
// The standalone `conductor` binary reports startup failures before the
// alternate-screen mode starts; those call sites opt out locally via `allow`.
#![deny(clippy::print_stdout, clippy::print_stderr)]
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use app::App;
use command_runner::BackendFactory;
use conductor_backend_client::ConductorBackend;
use conductor_backend_client::HttpClient;
use tracing_appender::non_blocking;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod app;
mod app_event;
mod app_event_sender;
mod cancel_hint;
mod cli;
mod command_runner;
mod composer;
pub mod config;
mod confirm_gate;
mod coordinator;
mod render;
mod slash_command;
mod streaming;
mod task_poll;
mod tui;

pub use cli::Cli;
use config::Config;

const USER_AGENT: &str = concat!("conductor-tui/", env!("CARGO_PKG_VERSION"));

pub async fn run_main(cli: Cli) -> std::io::Result<()> {
    let home = config::conductor_home()?;
    let config = Config::load_with_overrides(cli.config_overrides())?;

    let log_dir = config::log_dir(&home);
    std::fs::create_dir_all(&log_dir)?;
    // Open (or create) your log file, appending to it.
    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);

    // Ensure the file is only readable and writable by the current user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }

    let log_file = log_file_opts.open(log_dir.join("conductor-tui.log"))?;

    // Wrap file in non-blocking writer.
    let (non_blocking, _guard) = non_blocking(log_file);

    let default_filter = if cli.debug {
        "conductor_tui=info,conductor_backend_client=info"
    } else {
        "conductor_tui=warn,conductor_backend_client=warn"
    };

    // use RUST_LOG env var, defaulting based on debug flag.
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_filter(env_filter());

    let _ = tracing_subscriber::registry().with(file_layer).try_init();
    tracing::info!(server = %config.server_url, "starting conductor");

    let backend = build_backend(&config, config::load_token(&home))?;
    let factory = backend_factory(config.clone(), home);
    let runtime = tokio::runtime::Handle::current();

    // The event loop blocks on its channel; keep it off the async workers.
    tokio::task::spawn_blocking(move || run_ratatui_app(cli, config, backend, factory, runtime))
        .await
        .map_err(std::io::Error::other)?
        .map_err(|err| std::io::Error::other(err.to_string()))
}

fn build_backend(
    config: &Config,
    token: Option<String>,
) -> std::io::Result<Arc<dyn ConductorBackend>> {
    let mut client = HttpClient::new(config.server_url.clone())
        .map_err(std::io::Error::other)?
        .with_user_agent(USER_AGENT)
        .with_stream_idle_timeout(Duration::from_millis(config.stream_idle_timeout_ms));
    if let Some(token) = token {
        client = client.with_bearer_token(token);
    }
    Ok(Arc::new(client))
}

/// Re-authentication insists on finding a token; the initial connection does
/// not, since the server may not require one.
fn backend_factory(config: Config, home: PathBuf) -> BackendFactory {
    Arc::new(move || {
        let token = config::load_token(&home).ok_or_else(|| missing_token_message(&home))?;
        build_backend(&config, Some(token)).map_err(|e| e.to_string())
    })
}

fn missing_token_message(home: &Path) -> String {
    format!(
        "no token in CONDUCTOR_API_TOKEN or {}",
        home.join("auth.json").display()
    )
}

fn run_ratatui_app(
    cli: Cli,
    config: Config,
    backend: Arc<dyn ConductorBackend>,
    factory: BackendFactory,
    runtime: tokio::runtime::Handle,
) -> color_eyre::Result<()> {
    color_eyre::install()?;

    // Forward panic reports through tracing, then chain to the previous hook
    // so users still get a rich report after the terminal is restored.
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("panic: {info}");
        prev_hook(info);
    }));

    let mut terminal = tui::init()?;
    let mut app = App::new(&config, backend, factory, cli.prompt, runtime);
    let app_result = app.run(&mut terminal);

    restore();
    app_result
}

#[expect(
    clippy::print_stderr,
    reason = "TUI should no longer be displayed, so we can write to stderr."
)]
fn restore() {
    if let Err(err) = tui::restore() {
        eprintln!(
            "failed to restore terminal. Run `reset` or restart your terminal to recover: {err}"
        );
    }
}
