use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use clap::Parser;

use shaledb_server::config::parse_mem;
use shaledb_server::pool::WorkerPool;

/// The shaledb server.
#[derive(Debug, Parser)]
#[command(name = "shaledb-server", version, about)]
#[command(group(
    clap::ArgGroup::new("database")
        .required(true)
        .args(["create", "open"]),
))]
struct Args {
    /// Initialise a new database at this path, then serve it.
    #[arg(long, value_name = "DBPATH")]
    create: Option<PathBuf>,

    /// Open an existing database at this path.
    #[arg(long, value_name = "DBPATH")]
    open: Option<PathBuf>,

    /// Page-cache memory budget, e.g. 64MB, 1GB.
    #[arg(long, default_value = "64MB")]
    mem: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9999)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mem = parse_mem(&args.mem)?;

    let db = match (&args.create, &args.open) {
        (Some(path), None) => shaledb_sql::Database::create(path, mem)
            .with_context(|| format!("failed to create database at {}", path.display()))?,
        (None, Some(path)) => shaledb_sql::Database::open(path, mem)
            .with_context(|| format!("failed to open database at {}", path.display()))?,
        _ => bail!("exactly one of --create and --open is required"),
    };

    let listener = TcpListener::bind(("127.0.0.1", args.port))
        .with_context(|| format!("failed to bind 127.0.0.1:{}", args.port))?;

    let workers = thread::available_parallelism().map_or(4, |n| n.get());
    let pool = WorkerPool::new(workers, workers * 2);
    shaledb_server::serve(listener, Arc::new(db), &pool);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn exactly_one_database_flag_is_required() {
        // Option-parse failures make clap exit non-zero.
        assert!(Args::try_parse_from(["shaledb-server"]).is_err());
        assert!(Args::try_parse_from(["shaledb-server", "--create", "a", "--open", "b"]).is_err());
        assert!(Args::try_parse_from(["shaledb-server", "--open", "a"]).is_ok());
    }

    #[test]
    fn bad_mem_budget_fails_startup() {
        // Clap accepts any string for --mem; startup then errors out of
        // main (a non-zero exit) when it does not parse as a size.
        let args =
            Args::try_parse_from(["shaledb-server", "--open", "a", "--mem", "lots"]).unwrap();
        assert!(parse_mem(&args.mem).is_err());

        let args = Args::try_parse_from(["shaledb-server", "--open", "a"]).unwrap();
        assert_eq!(args.mem, "64MB");
        assert!(parse_mem(&args.mem).is_ok());
    }
}
