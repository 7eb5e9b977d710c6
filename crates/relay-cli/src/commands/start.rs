use tracing::{info, warn};

use relay_config::RelayConfig;
use relay_runtime::Runtime;

pub(super) async fn cmd_start(
    mut config: RelayConfig,
    listen: Option<String>,
) -> relay_core::Result<()> {
    if let Some(listen) = listen {
        config.server.listen = listen;
    }

    println!("relay v{}", env!("CARGO_PKG_VERSION"));
    println!("   Model: {}", config.agent.model);
    println!("   Tasks: {}", config.memory.root.display());
    println!("   Listening: ws://{}/ws", config.server.listen);
    println!();

    let provider = super::build_provider(&config)?;
    let server_config = config.server.clone();
    let runtime = Runtime::from_config(config, provider)?;

    let result = tokio::select! {
        r = relay_server::start_server(server_config, runtime.clone()) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };
    if let Err(ref e) = result {
        warn!(error = %e, "server stopped");
    }

    runtime.shutdown().await;
    result
}
