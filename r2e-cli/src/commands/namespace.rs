use std::path::Path;

use colored::Colorize;
use r2e_core::namespace::{NSNodeType, NSTreeNode};

use crate::workspace;

/// `r2e namespace <workspace.json>` — print `getNamespaceStructure()`,
/// including empty namespace nodes.
pub async fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let file = workspace::load(path)?;
    let hub = workspace::build_and_replay(&file).await?;
    let forest = hub.namespace_structure();
    hub.stop().await;

    if forest.is_empty() {
        println!("{}", "Namespace is empty.".dimmed());
        return Ok(());
    }
    for root in &forest {
        print_node(root, 0);
    }
    Ok(())
}

fn print_node(node: &NSTreeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let label = match node.node_type {
        NSNodeType::HierarchyNode => node.name.normal(),
        NSNodeType::Namespace => node.name.cyan(),
    };
    println!("{indent}{label} {}", node.full_path.dimmed());
    for child in &node.children {
        print_node(child, depth + 1);
    }
}
