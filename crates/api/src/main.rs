use std::sync::Arc;
use std::time::Duration;

use announcer::Scheduler;
use anyhow::Result;
use api::{build_router, ApiState};
use axum::Router;
use common::{logging, AppConfig};
use ledger::pg::PgLedger;
use ledger::Ledger;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging("info");
    let config = AppConfig::load()?;

    let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::connect(&config.database.url).await?);

    let scheduler = Arc::new(Scheduler::new(Duration::from_secs(
        config.announcer.tick_secs,
    )));
    let state = Arc::new(ApiState {
        ledger,
        min_contributions: config.leaderboard.min_contributions,
        scheduler,
    });
    let app: Router = build_router(state);

    let addr: std::net::SocketAddr = config.api.bind.parse()?;
    info!("api listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
