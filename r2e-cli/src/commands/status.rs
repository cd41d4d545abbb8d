use std::path::Path;

use colored::Colorize;

use crate::workspace;

/// `r2e status <workspace.json>` — replay the workspace's samples through an
/// in-memory hub and print `getSystemStatus()`.
pub async fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let file = workspace::load(path)?;
    let hub = workspace::build_and_replay(&file).await?;
    let status = hub.system_status_async().await;
    hub.stop().await;

    println!("{}", "System status".bold());
    println!("  topics          {}", status.total_topics);
    println!("  active          {}", status.active_topics);
    println!("  assigned        {}", status.assigned_topics);
    println!("  namespaces      {}", status.total_namespaces);
    println!("  live transports {}", status.live_transports);
    println!(
        "  queue           processed={} errors={}",
        status.queue.processed, status.queue.errors
    );
    if !status.topics_per_source_type.is_empty() {
        println!("  {}", "per source type".dimmed());
        let mut entries: Vec<_> = status.topics_per_source_type.iter().collect();
        entries.sort_by_key(|(k, _)| k.to_string());
        for (source_type, count) in entries {
            println!("    {source_type:<16} {count}");
        }
    }
    Ok(())
}
