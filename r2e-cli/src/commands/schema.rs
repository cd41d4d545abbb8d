use colored::Colorize;
use r2e_core::connection::ConnectionDescriptor;

/// `r2e schema <connection-type>` — print the connection/input/output
/// config schemas a descriptor exposes. Only connection types
/// compiled into this binary (via the `mqtt`/`socketio` features) are
/// available.
pub fn run(connection_type: &str) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = descriptor_for(connection_type)
        .ok_or_else(|| format!("unknown or disabled connection type '{connection_type}'"))?;

    println!("{}", descriptor.display_name().bold());
    print_schema("connection", &descriptor.connection_schema());
    print_schema("input", &descriptor.input_schema());
    print_schema("output", &descriptor.output_schema());
    Ok(())
}

fn print_schema(label: &str, schema: &r2e_core::connection::ConfigSchema) {
    if schema.fields.is_empty() {
        return;
    }
    println!("  {}", label.underline());
    let mut fields = schema.fields.clone();
    fields.sort_by_key(|f| f.order);
    for field in &fields {
        let required = if field.required { "*".red() } else { "".normal() };
        let secret = if field.is_secret { " [secret]".yellow() } else { "".normal() };
        println!(
            "    {}{} {:?} ({}){}",
            field.name, required, field.field_type, field.group, secret
        );
    }
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
