use std::process::ExitCode;

use parley::app::App;
use parley::settings::SettingsStore;
use parley::shell::{HELP, run_shell};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Logs go to stderr so the transcript on stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    tracing::info!(
        config_path = %settings_store.config_path().display(),
        model = %settings.model,
        offline = settings.is_offline(),
        "loaded settings"
    );

    let app = match App::build(settings_store).await {
        Ok(app) => app,
        Err(error) => {
            tracing::error!(error = %error, "failed to start");
            return ExitCode::FAILURE;
        }
    };
    let report = app.start().await;

    let mut stdout = tokio::io::stdout();
    let banner = format!(
        "parley session {} ({} restored message(s)). {HELP}\n",
        report.session_id, report.restored_messages
    );
    if let Err(error) = stdout.write_all(banner.as_bytes()).await {
        tracing::error!(error = %error, "failed to write to stdout");
        return ExitCode::FAILURE;
    }

    match run_shell(&app, BufReader::new(tokio::io::stdin()), stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "shell stopped on an io error");
            ExitCode::FAILURE
        }
    }
}
