use std::path::Path;

use colored::Colorize;

use crate::workspace;

pub struct TopicsFilter {
    pub pattern: Option<String>,
    pub source_type: Option<String>,
    pub unverified_only: bool,
}

/// `r2e topics <workspace.json> [--pattern] [--source-type] [--unverified]`
pub async fn run(path: &Path, filter: TopicsFilter) -> Result<(), Box<dyn std::error::Error>> {
    let file = workspace::load(path)?;
    let hub = workspace::build_and_replay(&file).await?;

    let mut topics = if filter.unverified_only {
        hub.unverified_topics()
    } else if let Some(pattern) = &filter.pattern {
        hub.search_topics(pattern)
    } else if let Some(source_type) = &filter.source_type {
        hub.topics_by_source_type(source_type)
    } else {
        hub.list_topics()
    };
    hub.stop().await;

    topics.sort_by(|a, b| a.topic.cmp(&b.topic));

    if topics.is_empty() {
        println!("{}", "No topics matched.".dimmed());
        return Ok(());
    }

    for topic in &topics {
        let marker = if topic.is_verified {
            "✓".green()
        } else {
            "?".yellow()
        };
        println!(
            "  {} {:<32} {:<10} {}",
            marker,
            topic.topic,
            topic.source_type.dimmed(),
            topic.ns_path
        );
    }
    println!("{}", format!("{} topic(s)", topics.len()).dimmed());
    Ok(())
}
