//! `snowberg connections`

use anyhow::Result;
use snowberg_config::{RuntimeConfig, SnowflakeConnection};

use crate::init;

pub fn run(config: &RuntimeConfig) -> Result<()> {
    let file = init::connections_file(config)?;
    let active = &config.snowflake.connection;

    println!("Connections in {}:", file.path().display());
    let names = file.names();
    if names.is_empty() {
        println!("  (none)");
        return Ok(());
    }

    for name in names {
        let marker = if &name == active { "*" } else { " " };
        match file.get(&name) {
            Ok(connection) => println!(
                "{} {:<16} account={} user={} role={} auth={}",
                marker,
                name,
                connection.account,
                connection.user.as_deref().unwrap_or("-"),
                connection.role.as_deref().unwrap_or("-"),
                auth_method(&connection),
            ),
            Err(e) => println!("{} {:<16} invalid: {}", marker, name, e),
        }
    }
    Ok(())
}

/// Mirrors the order the SQL API client picks credentials in
fn auth_method(connection: &SnowflakeConnection) -> &'static str {
    if connection.private_key_file.is_some() {
        "key-pair"
    } else if connection.token.is_some() {
        "token"
    } else if connection.password.is_some() {
        "password (unsupported)"
    } else {
        "missing"
    }
}
