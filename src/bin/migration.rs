use clap::{Parser, Subcommand};
use devicedesk_api::{
    config,
    db::{self, DbConfig},
};
use migrations::{Migrator, MigratorTrait};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "devicedesk-migrate",
    about = "Apply or inspect DeviceDesk schema migrations",
    version
)]
struct Cli {
    /// Database URL; defaults to the configured `database_url`
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Option<MigrateCommand>,
}

#[derive(Subcommand, Clone, Copy)]
enum MigrateCommand {
    /// Apply all pending migrations (default)
    Up,
    /// Roll back the last applied migration
    Down,
    /// List applied and pending migrations
    Status,
    /// Drop every table and re-apply all migrations
    Fresh,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_tracing("info", false);

    let database_url = match cli.database_url {
        Some(url) => url,
        None => config::load_config()?.database_url,
    };

    let db_config = DbConfig {
        url: database_url,
        max_connections: 2,
        min_connections: 1,
        ..DbConfig::default()
    };
    let pool = db::establish_connection(&db_config).await?;

    match cli.command.unwrap_or(MigrateCommand::Up) {
        MigrateCommand::Up => {
            Migrator::up(&pool, None).await?;
            info!("Migrations applied");
        }
        MigrateCommand::Down => {
            Migrator::down(&pool, Some(1)).await?;
            info!("Rolled back one migration");
        }
        MigrateCommand::Status => {
            Migrator::status(&pool).await?;
        }
        MigrateCommand::Fresh => {
            Migrator::fresh(&pool).await?;
            info!("Schema recreated");
        }
    }

    db::close_pool(pool).await?;
    Ok(())
}
