use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use sqlx::postgres::PgPoolOptions;

use forum_import::config::ImportConfig;
use forum_import::destination::PgDestination;
use forum_import::import::Importer;

#[derive(Parser, Debug)]
#[command(
    name = "forum-import",
    about = "Import an exported forum corpus and write the correlation file"
)]
struct Args {
    /// Newline-delimited JSON export to import. Must exist.
    input: PathBuf,

    /// Correlation file to write (created or truncated).
    output: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    forum_import::init_logger();

    let args = Args::parse();
    if !args.input.is_file() {
        let _ = writeln!(
            io::stderr(),
            "error: input file '{}' does not exist\n\n{}",
            args.input.display(),
            Args::command().render_usage()
        );
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("import aborted: {}", err);
            let _ = writeln!(io::stderr(), "error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
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

    let input = BufReader::new(File::open(&args.input)?);
    let output = BufWriter::new(File::create(&args.output)?);

    log::info!(
        "importing {} into {}",
        args.input.display(),
        args.output.display()
    );
    let stats = Importer::new(&destination, config).run(input, output).await?;
    println!(
        "Imported users ({}), projects ({}), posts ({}); wrote {} correlation records to {}",
        stats.users,
        stats.projects,
        stats.posts,
        stats.correlations_written,
        args.output.display()
    );

    destination.pool().close().await;
    Ok(())
}
