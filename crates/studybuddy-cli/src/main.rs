use clap::Parser;
use studybuddy_core::StudyError;

mod app;
mod commands;

use commands::{render_error, Cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = studybuddy_core::Settings::load();

    if let Err(e) = app::run(settings, cli).await {
        match e.downcast_ref::<StudyError>() {
            Some(err) => eprintln!("{}", render_error(err)),
            None => eprintln!("error: {:#}", e),
        }
        std::process::exit(1);
    }
}
