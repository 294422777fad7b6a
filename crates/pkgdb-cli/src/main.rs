//! pkgdb CLI - Command-line interface for package database maintenance

use anyhow::Result;
use clap::{Parser, Subcommand};
use pkgdb::{DbConfig, PkgdbError};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "pkgdb")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Install root the database lives under
    #[arg(short, long, default_value = "/")]
    root: PathBuf,

    /// Database directory, relative to the root
    #[arg(long, default_value = "var/lib/pkgdb")]
    dbpath: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty database
    Init {
        /// Permission bits for new database files (octal)
        #[arg(long, default_value = "644", value_parser = parse_octal)]
        perms: u32,
    },

    /// Check every store for structural damage without writing
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild all indexes from the stored headers
    Rebuild {
        /// Headers per shadow write transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List headers, by index lookup or full scan
    Query {
        /// Tag to look up (name, basenames, providename, label, packages, ...)
        #[arg(short, long, default_value = "name")]
        tag: String,

        /// Key to look up; omit for a full scan
        key: Option<String>,

        /// Extra filter as TAG:MODE:PATTERN (mode: default, strcmp, regex, glob)
        #[arg(short = 'm', long = "match")]
        filters: Vec<String>,

        /// Restrict to these instance numbers
        #[arg(short, long)]
        instance: Vec<u32>,
    },

    /// Count installed headers with the given name
    Count {
        name: String,
    },

    /// List the keys of one index
    Keys {
        /// Indexed tag (name, basenames, requirename, ...)
        tag: String,
    },
}

fn parse_octal(s: &str) -> std::result::Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0o"), 8).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        let status = e.downcast_ref::<PkgdbError>().map_or(1, PkgdbError::status);
        std::process::exit(status);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = DbConfig::new(&cli.root).with_db_path(&cli.dbpath);

    // Execute command
    match cli.command {
        Commands::Init { perms } => commands::init::execute(config.with_perms(perms)),
        Commands::Verify { json } => commands::verify::execute(config, json),
        Commands::Rebuild { batch_size, json } => {
            let config = match batch_size {
                Some(size) => config.with_rebuild_batch_size(size),
                None => config,
            };
            commands::rebuild::execute(config, json)
        }
        Commands::Query {
            tag,
            key,
            filters,
            instance,
        } => commands::query::execute(config, &tag, key.as_deref(), &filters, &instance),
        Commands::Count { name } => commands::count::execute(config, &name),
        Commands::Keys { tag } => commands::keys::execute(config, &tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "pkgdb", "--root", "/tmp/r", "query", "-t", "basenames", "bash", "-m",
            "version:glob:5.*",
        ])
        .unwrap();
        assert_eq!(cli.root, PathBuf::from("/tmp/r"));
        match cli.command {
            Commands::Query {
                tag, key, filters, ..
            } => {
                assert_eq!(tag, "basenames");
                assert_eq!(key.as_deref(), Some("bash"));
                assert_eq!(filters, vec!["version:glob:5.*".to_string()]);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_parse_octal() {
        assert_eq!(parse_octal("644"), Ok(0o644));
        assert_eq!(parse_octal("0o600"), Ok(0o600));
        assert!(parse_octal("9").is_err());
    }
}
