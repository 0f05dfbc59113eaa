//! `snowberg create-table`

use anyhow::{bail, Result};
use clap::Args;
use dialoguer::Input;
use snowberg_config::RuntimeConfig;
use snowberg_core::table::{
    create_iceberg_table, verify_table_storage, ColumnDef, IcebergTableRequest,
};

use super::is_interactive;
use crate::init;

#[derive(Args, Debug, Default)]
pub struct TableArgs {
    /// Database (defaults to the connection's database)
    #[arg(long)]
    pub database: Option<String>,

    /// Schema (defaults to the connection's schema)
    #[arg(long)]
    pub schema: Option<String>,

    /// Table name
    #[arg(long)]
    pub table: Option<String>,

    /// Column as NAME:TYPE, repeatable
    #[arg(long = "column", value_name = "NAME:TYPE")]
    pub columns: Vec<ColumnDef>,

    /// External volume the table stores its data on
    #[arg(long, value_name = "NAME")]
    pub volume: Option<String>,

    /// Bucket behind the volume, for the storage check
    #[arg(long)]
    pub bucket: Option<String>,

    /// Skip listing the table's objects in S3
    #[arg(long)]
    pub no_verify: bool,
}

pub async fn run(config: RuntimeConfig, args: TableArgs) -> Result<()> {
    let interactive = is_interactive();
    let connection = init::snowflake_connection(&config)?;

    let database = resolve("Database", args.database, connection.database.clone(), interactive)?;
    let schema = resolve("Schema", args.schema, connection.schema.clone(), interactive)?;
    let table = resolve("Table name", args.table, None, interactive)?;

    let columns = if args.columns.is_empty() && interactive {
        prompt_columns()?
    } else {
        args.columns
    };

    let request = IcebergTableRequest {
        database: database.to_uppercase(),
        schema: schema.to_uppercase(),
        table: table.to_uppercase(),
        columns,
        external_volume: args
            .volume
            .unwrap_or_else(|| config.snowflake.volume_name.clone()),
    };
    request.validate()?;

    let warehouse = init::warehouse_client(&config)?;

    println!();
    println!("{}", request.create_statement());
    println!();

    create_iceberg_table(&warehouse, &request).await?;
    println!("Created Iceberg table {}", request.qualified_name());

    let bucket = args.bucket.or_else(|| config.aws.bucket.clone());
    match bucket {
        Some(bucket) if !args.no_verify => {
            let cloud = init::aws_control_plane(&config).await;
            let objects = verify_table_storage(&cloud, &bucket, &request).await?;
            if objects.is_empty() {
                println!(
                    "No objects under s3://{}/{} yet; they appear after the first write.",
                    bucket,
                    request.base_location()
                );
            } else {
                println!("Objects under s3://{}/{}:", bucket, request.base_location());
                for object in objects {
                    println!("  {} ({} bytes)", object.key, object.size);
                }
            }
        }
        Some(_) => {}
        None if !args.no_verify => {
            println!("No bucket configured; skipping the storage check (pass --bucket to run it).");
        }
        None => {}
    }

    Ok(())
}

/// Flag, then connection default, then prompt
fn resolve(
    what: &str,
    flag: Option<String>,
    fallback: Option<String>,
    interactive: bool,
) -> Result<String> {
    if let Some(value) = flag.or(fallback) {
        return Ok(value);
    }
    if !interactive {
        bail!("{} is required (no default in the connection and no terminal to ask)", what);
    }
    Ok(Input::new().with_prompt(what).interact_text()?)
}

fn prompt_columns() -> Result<Vec<ColumnDef>> {
    let line: String = Input::new()
        .with_prompt("Columns (NAME:TYPE, comma separated)")
        .validate_with(|input: &String| parse_columns(input).map(|_| ()))
        .interact_text()?;
    Ok(parse_columns(&line)?)
}

fn parse_columns(line: &str) -> snowberg_core::Result<Vec<ColumnDef>> {
    split_columns(line)
        .into_iter()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::parse)
        .collect()
}

/// Commas inside a type's parentheses, as in `DECIMAL(10,2)`, do not split
fn split_columns(line: &str) -> Vec<&str> {
    let mut columns = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                columns.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    columns.push(&line[start..]);
    columns
}
