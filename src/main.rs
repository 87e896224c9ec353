use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use std::env;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photo_timeline::config::get_config;
use photo_timeline::context::AppContext;
use photo_timeline::routes::create_routes;
use photo_timeline::services::worker::Worker;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate,
    /// Reset database (refresh migrations)
    Reset,
    /// Run the HTTP API
    Serve,
    /// Run a queue worker (default or cluster)
    Worker {
        #[arg(long, default_value = "default")]
        queue: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = Database::connect(database_url)
        .await
        .expect("Failed to connect to database");

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Migrate) => {
            Migrator::up(&db, None).await.expect("Migration failed");
            info!("migrations applied successfully");
        }
        Some(Commands::Reset) => {
            Migrator::refresh(&db).await.expect("Migration refresh failed");
            info!("database reset successfully");
        }
        Some(Commands::Worker { queue }) => {
            let config = get_config();
            let ctx = AppContext::initialize(db, config)
                .await
                .expect("Failed to initialize worker context");
            Worker::new(ctx, queue).run().await;
        }
        Some(Commands::Serve) | None => {
            let config = get_config();
            let ctx = AppContext::initialize(db, config)
                .await
                .expect("Failed to initialize server context");
            let app = create_routes(ctx);

            let listener = tokio::net::TcpListener::bind(&config.bind_addr)
                .await
                .expect("Failed to bind listen address");
            info!("listening on {}", listener.local_addr().unwrap());
            axum::serve(listener, app).await.unwrap();
        }
    }
}
