pub mod serve;
pub mod tasks;
pub mod topology;

pub use serve::run_serve;
pub use tasks::{run_cancel, run_tasks};
pub use topology::{run_prepare, run_start, run_topology};

use anyhow::{Context, Result};
use prism_ctl::CtlClient;
use std::time::Duration;

/// Connect to the control server at `addr`
pub async fn connect(addr: &str, timeout: Duration) -> Result<CtlClient> {
    let sock_addr = addr
        .parse()
        .with_context(|| format!("Invalid control server address '{}'", addr))?;
    let client = CtlClient::connect(sock_addr, timeout).await?;
    Ok(client)
}

/// Ask a running adapter to exit
pub async fn run_shutdown(addr: &str, timeout: Duration) -> Result<()> {
    let client = connect(addr, timeout).await?;
    client.shutdown().await?;
    println!("Shutdown requested for {}", addr);
    Ok(())
}
