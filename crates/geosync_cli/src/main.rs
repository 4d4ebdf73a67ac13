//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `geosync_core` linkage.
//! - Print sync queue counters for a database file when one is given.
//! - Write core logs to `log_dir` when one is given.
//!
//! Usage: `geosync_cli [db_path [log_dir]]`

use geosync_core::db::{open_db, schema_version};
use geosync_core::{default_log_level, flush_logging, init_logging, SqliteJobQueue};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("geosync_core ping={}", geosync_core::ping());
    println!("geosync_core version={}", geosync_core::core_version());

    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next() else {
        return ExitCode::SUCCESS;
    };
    if let Some(log_dir) = args.next() {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("failed to initialize logging: {err}");
            return ExitCode::FAILURE;
        }
    }

    let code = report(&db_path);
    flush_logging();
    code
}

fn report(db_path: &str) -> ExitCode {
    let conn = match open_db(db_path) {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("failed to open `{db_path}`: {err}");
            return ExitCode::FAILURE;
        }
    };

    match schema_version(&conn) {
        Ok(version) => println!("schema version={version}"),
        Err(err) => eprintln!("failed to read schema version: {err}"),
    }

    let queue = SqliteJobQueue::new(&conn);
    match (queue.stats(), queue.dead_jobs()) {
        (Ok(stats), Ok(dead)) => {
            println!(
                "sync_jobs pending={} running={} done={} dead={}",
                stats.pending, stats.running, stats.done, stats.dead
            );
            for job in dead {
                println!(
                    "dead job_id={} operation={} node={} attempts={} error={}",
                    job.id,
                    job.operation,
                    job.ordering_key,
                    job.attempts,
                    job.last_error.as_deref().unwrap_or("-")
                );
            }
            ExitCode::SUCCESS
        }
        (Err(err), _) | (_, Err(err)) => {
            eprintln!("failed to read sync queue: {err}");
            ExitCode::FAILURE
        }
    }
}
