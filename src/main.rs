// Entrypoint for the CLI application.
// - Loads settings (and an optional `.env`), sets up logging, builds the
//   Label Studio client and hands it to the interactive menu.
// - Any error that reaches this point is logged before the process exits
//   with a failure status.

use anyhow::Context;
use labelsync_cli::api::LabelStudioClient;
use labelsync_cli::config::Settings;
use labelsync_cli::{logging, ui};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env().context("invalid configuration")?;
    logging::init(&settings.logging)?;

    let result = run(&settings);
    if let Err(e) = &result {
        let message = format!("{e:#}");
        tracing::error!(error = %message, "an error occurred");
    }
    result
}

fn run(settings: &Settings) -> anyhow::Result<()> {
    ui::print_welcome_message();

    let api = LabelStudioClient::new(&settings.client_config())
        .context("failed to build the Label Studio client")?;
    tracing::info!(url = %settings.url, workers = settings.num_workers, "connected client");

    ui::main_menu(&api, settings)
}
