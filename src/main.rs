use clap::Parser;
use migration::{Migrator, MigratorTrait};
use miette::{IntoDiagnostic, Result};
use passrelay::artifact::HttpArtifactBuilder;
use passrelay::push::HttpPushTransport;
use passrelay::{jobs, settings, storage, web};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "passrelay",
    version,
    about = "Wallet pass registration and update service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database) and bring the schema up to date
    let db = storage::init(&settings.database).await.into_diagnostic()?;
    Migrator::up(&db, None).await.into_diagnostic()?;

    // background jobs
    let _scheduler = jobs::init_scheduler(db.clone()).await.into_diagnostic()?;

    // external collaborators
    let push = Arc::new(HttpPushTransport::new(&settings.push).into_diagnostic()?);
    let artifacts = Arc::new(HttpArtifactBuilder::new(&settings.artifacts).into_diagnostic()?);

    // start web servers
    web::serve(settings, db, push, artifacts).await?;
    Ok(())
}
