use super::connect;
use crate::ChangeArgs;
use anyhow::Result;
use prism_ctl::{CtlClient, Topology, TopologyChange, TopologyChangeType};
use std::time::Duration;

/// Print the topology, optionally waiting for a change from `rev`
pub async fn run_topology(addr: &str, timeout: Duration, rev: Option<String>) -> Result<()> {
    let client = connect(addr, timeout).await?;
    let have_rev = rev.unwrap_or_default();
    let topology = client.current_topology(have_rev.as_bytes()).await?;
    print_topology(&topology);
    Ok(())
}

pub async fn run_prepare(addr: &str, timeout: Duration, args: ChangeArgs) -> Result<()> {
    let client = connect(addr, timeout).await?;
    let change = build_change(&client, args).await?;
    let id = change.id.clone();
    client.prepare_topology_change(change).await?;
    println!("Prepared topology change {}", id);
    Ok(())
}

pub async fn run_start(addr: &str, timeout: Duration, args: ChangeArgs) -> Result<()> {
    let client = connect(addr, timeout).await?;
    let change = build_change(&client, args).await?;
    let id = change.id.clone();
    client.start_topology_change(change).await?;
    println!("Started topology change {}", id);
    Ok(())
}

/// Build the change, pinned to the current topology unless forced
async fn build_change(client: &CtlClient, args: ChangeArgs) -> Result<TopologyChange> {
    let change_type = if args.failover {
        TopologyChangeType::Failover
    } else {
        TopologyChangeType::Rebalance
    };
    let change = TopologyChange::new(args.id, change_type, args.nodes);

    if args.force {
        return Ok(change);
    }
    let current = client.current_topology(b"").await?;
    Ok(change.with_topology_rev(current.rev))
}

fn print_topology(topology: &Topology) {
    println!("Topology");
    println!("========");
    println!("Revision: {}", String::from_utf8_lossy(&topology.rev));
    println!("Balanced: {}", topology.is_balanced);
    println!();

    println!("{:<30}", "NODE");
    println!("{}", "-".repeat(30));
    for node in &topology.nodes {
        println!("{:<30}", node);
    }

    if !topology.messages.is_empty() {
        println!();
        for message in &topology.messages {
            println!("{}", message);
        }
    }
}
