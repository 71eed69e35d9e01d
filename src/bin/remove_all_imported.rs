use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use forum_import::config::ImportConfig;
use forum_import::destination::{Destination, PgDestination};

#[derive(Parser, Debug)]
#[command(
    name = "remove_all_imported",
    about = "Delete every post, topic, group, category and user created by forum-import"
)]
struct Args {}

#[tokio::main]
async fn main() -> ExitCode {
    forum_import::init_logger();
    let _args = Args::parse();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("cleanup aborted: {}", err);
            let _ = writeln!(io::stderr(), "error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ImportConfig::from_env();
    let database_url = config
        .database_url
        .clone()
        .ok_or("DATABASE_URL must be set to the destination database")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await?;
    let destination = PgDestination::new(pool, config.avatar_timeout)?;

    let report = destination.remove_imported().await?;
    println!("Removed {} posts", report.posts);
    println!("Removed {} topics", report.topics);
    println!("Removed {} groups", report.groups);
    println!("Removed {} categories", report.categories);
    println!("Removed {} users", report.users);
    println!("Removed {} avatar uploads", report.uploads);
    println!("Removed {} single sign-on records", report.sso_records);

    destination.pool().close().await;
    Ok(())
}
