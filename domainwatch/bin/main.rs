//! Binary entry point: load config, init logging, run the monitor.

use domainwatch::DomainMonitor;
use domainwatch_common::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    domainwatch_common::logging::init();

    let config = Config::from_env()?;
    tracing::info!(instance_id = %config.instance_id, "domainwatch starting");

    let monitor = DomainMonitor::new(config);
    monitor.run().await?;

    Ok(())
}
