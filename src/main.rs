use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use termgate::config::Config;
use termgate::server::Server;

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    termgate::logger::init(&config)?;

    log::info!(
        "starting termgate on {} with {} worker threads",
        config.server.bind,
        config.server.threads
    );

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.threads)
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let server = Server::new(&config).await?;
    let shutdown_handle = server.clone();
    let bind = config.server.bind;

    let listener = tokio::net::TcpListener::bind(bind).await?;
    let router = server.router();

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutdown signal received, closing sessions");
            shutdown_handle.shutdown().await;
        })
        .await?;

    Ok(())
}
