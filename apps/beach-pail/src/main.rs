use beach_pail::session::SessionState;
use beach_pail::terminal::{app, cli::Cli};
use clap::Parser;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    app::init_logging(&cli.logging)?;

    match app::run(cli).await {
        Ok(snapshot) if snapshot.state == SessionState::Completed => Ok(ExitCode::SUCCESS),
        Ok(_) => Ok(ExitCode::FAILURE),
        Err(err) => {
            error!(error = %err, "beach-pail failed");
            Err(err.into())
        }
    }
}
