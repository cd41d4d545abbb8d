use std::path::Path;

use colored::Colorize;
use r2e_core::connection::ConnectionDescriptor;
use r2e_events::EventBus;

use crate::workspace;

/// `r2e validate <workspace.json>` — build a throwaway instance of each
/// declared connection type and run `validate_configuration` against it,
/// for connection types compiled into this binary. No transport is ever
/// started.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let file = workspace::load(path)?;

    if file.connections.is_empty() {
        println!("{}", "No connections declared in workspace file.".dimmed());
        return Ok(());
    }

    let bus = EventBus::new();
    let mut failures = 0;
    for connection in &file.connections {
        let Some(descriptor) = descriptor_for(&connection.connection_type) else {
            println!(
                "  {} {} — connection type '{}' not compiled into this binary, skipped",
                "?".yellow(),
                connection.id,
                connection.connection_type
            );
            continue;
        };

        let instance = descriptor.create(connection.id.clone(), bus.clone());
        let result = instance.validate_configuration(connection);
        if result.valid {
            println!("  {} {}", "✓".green(), connection.id);
        } else {
            failures += 1;
            println!("  {} {}", "x".red(), connection.id);
            for error in &result.errors {
                println!("      {} {}", "error:".red(), error);
            }
        }
        for warning in &result.warnings {
            println!("      {} {}", "warning:".yellow(), warning);
        }
    }

    if failures > 0 {
        return Err(format!("{failures} connection(s) failed validation").into());
    }
    Ok(())
}

fn descriptor_for(connection_type: &str) -> Option<Box<dyn ConnectionDescriptor>> {
    #[cfg(feature = "mqtt")]
    if connection_type == "mqtt" {
        return Some(Box::new(r2e_connections_mqtt::MqttDescriptor));
    }
    #[cfg(feature = "socketio")]
    if connection_type == "socketio" {
        return Some(Box::new(r2e_connections_socketio::SocketIoDescriptor));
    }
    let _ = connection_type;
    None
}
