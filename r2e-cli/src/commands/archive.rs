use std::path::Path;
use std::time::Duration;

use colored::Colorize;

use crate::workspace;

/// `r2e archive <workspace.json> [--retention-minutes N]` — replay the
/// workspace's samples through an in-memory hub, then run the same
/// historical-retention sweep the scheduler would run on its configured
/// interval and print how many points it archived.
pub async fn run(path: &Path, retention_minutes: u64) -> Result<(), Box<dyn std::error::Error>> {
    let file = workspace::load(path)?;
    let hub = workspace::build_and_replay(&file).await?;
    let archived = hub
        .archive_now(Duration::from_secs(retention_minutes * 60))
        .await?;
    hub.stop().await;

    println!("{}", "Archive sweep".bold());
    println!("  retention  {retention_minutes}m");
    println!("  archived   {archived}");
    Ok(())
}
