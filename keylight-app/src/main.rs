use clap::Parser;

use keylight_app::cli::Cli;
use keylight_app::{Settings, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = match Settings::new(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(data_dir) = cli.data_dir {
        settings.storage.data_dir = Some(data_dir);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            let level = settings.logger.level.as_str();

            format!("{app_name}={level}").into()
        }))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(settings, cli.command, &mut std::io::stdout()).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
