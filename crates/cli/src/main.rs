use anyhow::Context;
use clap::{Parser, Subcommand};
use shelfswap_app::App;
use shelfswap_kernel::settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "shelfswap-cli", version, about = "Operate a ShelfSwap deployment")]
struct Cli {
    /// Override the SQLite path from configuration
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply migrations and serve the HTTP API until ctrl-c
    Serve,
    /// Apply pending migrations and exit
    Migrate,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load().with_context(|| "failed to load ShelfSwap settings")?;
    if let Some(path) = cli.database {
        settings.database.path = path;
    }
    shelfswap_telemetry::init(&settings.telemetry)?;

    match cli.command {
        Command::Serve => App::bootstrap(settings).await?.serve().await,
        Command::Migrate => {
            let app = App::bootstrap(settings).await?;
            app.db.health_check().await?;
            tracing::info!(db = %app.db.path(), "migrations up to date");
            Ok(())
        }
        Command::Config => {
            println!("{settings:#?}");
            Ok(())
        }
    }
}
