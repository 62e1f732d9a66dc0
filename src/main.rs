use anyhow::Context;
use shelfswap_app::App;
use shelfswap_kernel::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load ShelfSwap settings")?;
    shelfswap_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        db = %settings.database.path,
        "shelfswap bootstrap starting"
    );

    App::bootstrap(settings).await?.serve().await
}
