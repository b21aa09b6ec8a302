use clap::Parser;
use tracing::{debug, info, warn};

use overlayd::config::Config;

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = Config::parse(args.config)?;

    utils::set_log(format!(
        "overlay_hls={},overlayd={},http_log={},sea_orm=warn",
        cfg.log.level, cfg.log.level, cfg.log.level
    ));

    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let listener = tokio::net::TcpListener::bind(cfg.http.listen).await?;

    overlayd::serve(cfg, listener, shutdown_signal()).await?;
    info!("Server shutdown");
    Ok(())
}

async fn shutdown_signal() {
    let signal = utils::wait_for_stop_signal().await;
    debug!("Received signal: {}", signal);
}
