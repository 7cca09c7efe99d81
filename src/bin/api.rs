use finance_sql_agent::{
    agent::Supervisor, api::start_server, audit::RunLog, config::AgentConfig, db::PgDatabase,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env()?;

    info!("Finance SQL agent - API Server");
    info!("Port: {}", config.api_port);

    let db = PgDatabase::connect(
        config.require_database_url()?,
        config.db_max_connections,
        config.db_timeout,
    )
    .await?;

    let supervisor = Supervisor::from_config(&config, Arc::new(db))?.with_run_log(RunLog::new());
    let registered = supervisor.tools().sync_registry().await?;

    info!(
        relations = registered,
        max_attempts = supervisor.max_attempts(),
        "Supervisor initialized"
    );

    start_server(supervisor, config.api_port).await?;

    Ok(())
}
