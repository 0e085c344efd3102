//! Watch command handler.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::presentation::print_server_table;

/// Print each published snapshot until Ctrl-C, then dispose the hub.
pub async fn execute(ctx: &mut CliContext) -> Result<()> {
    print_server_table(&ctx.observer.latest());
    println!("\nWatching for changes (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            snapshot = ctx.snapshots.recv() => {
                let Some(servers) = snapshot else { break };
                println!();
                print_server_table(&servers);
            }
        }
    }

    ctx.hub.dispose().await;
    Ok(())
}
