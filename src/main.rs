use backchat::{AppState, auth::TokenVerifier, config::Config, db};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("backchat=debug,info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url).await?;
    db::init_schema(&db_pool).await?;

    let verifier = if config.allow_unverified_tokens {
        warn!("ALLOW_UNVERIFIED_TOKENS is set: token signatures and expiry are NOT checked");
        TokenVerifier::new_unverified(db_pool.clone())
    } else {
        TokenVerifier::new(db_pool.clone(), &config.jwt_secret)
    };

    let state = AppState::new(db_pool, verifier);
    let supervisor = state.supervisor.clone();
    let app = backchat::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down, closing live sessions");
            supervisor.shutdown_all().await;
        })
        .await?;

    Ok(())
}
