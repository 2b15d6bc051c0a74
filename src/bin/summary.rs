use anyhow::Result;
use clap::Parser;
use stayrec::{api, init_tracing, Config, SummaryState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Accommodation review summary server", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = Config::load_or_default(&args.config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.summary_server.workers.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting stayrec review summary server with config: {:?}", config.summary_server);
    let addr = config.summary_server.socket_addr()?;

    let state = SummaryState::new(config)?;
    let app = api::summary_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Summary server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
