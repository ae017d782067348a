//! webmirror CLI entry point.
//!
//! Exit codes: 0 success, 1 configuration/safety error, 2 invalid
//! arguments (clap), 130 interrupted, 3+ internal failures.

use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use webmirror::cli::Args;
use webmirror::session::{CrawlError, CrawlSummary, Maintenance, SessionController};
use webmirror::store::SessionStatus;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_level(args.log_level())
        .init();

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32, CrawlError> {
    if args.is_maintenance() {
        run_maintenance(&args).await?;
        return Ok(0);
    }

    let config = args.to_config()?;

    // SIGINT flips the cancellation token; a second one kills the process.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight work");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            }
        });
    }

    let controller = SessionController::new(config.clone()).await?;
    if args.clear_urls {
        let (urls, checksums) = controller.clear_urls(args.force_rescrape).await?;
        info!("cleared {urls} URL row(s), {checksums} checksum(s)");
    }

    let summary = controller.run(cancel).await?;
    report(&args, &config, &summary).await?;

    Ok(match summary.status {
        SessionStatus::Interrupted => 130,
        SessionStatus::Failed => 3,
        _ => 0,
    })
}

async fn report(
    args: &Args,
    config: &webmirror::config::CrawlConfig,
    summary: &CrawlSummary,
) -> Result<(), CrawlError> {
    println!(
        "Session {} {}: {} pages ok, {} failed in {:.1}s ({:.2} pages/s)",
        summary.session_id,
        match summary.status {
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
            other => other.as_str(),
        },
        summary.pages_success,
        summary.pages_failed,
        summary.elapsed.as_secs_f64(),
        summary.pages_per_second()
    );
    println!("Output: {}", config.output_dir().display());

    if args.list_files {
        for file in &summary.written_files {
            println!("{}", file.display());
        }
    }

    if args.save_urls || args.save_files {
        let maintenance = Maintenance::open(config.output_dir()).await?;
        let rows = maintenance.scraped_urls().await?;
        if args.save_urls {
            let list: String = rows.iter().map(|r| format!("{}\n", r.url)).collect();
            tokio::fs::write(config.output_dir().join("scraped_urls.txt"), list)
                .await
                .map_err(|e| CrawlError::Internal(e.into()))?;
        }
        if args.save_files {
            let list: String = rows
                .iter()
                .filter_map(|r| r.target_filename.as_ref())
                .map(|f| format!("{f}\n"))
                .collect();
            tokio::fs::write(config.output_dir().join("scraped_files.txt"), list)
                .await
                .map_err(|e| CrawlError::Internal(e.into()))?;
        }
    }
    Ok(())
}

async fn run_maintenance(args: &Args) -> Result<(), CrawlError> {
    let maintenance = Maintenance::open(&args.output_dir).await?;

    if args.show_db_stats {
        let stats = maintenance.stats().await?;
        println!("Database: {}", maintenance.store().db_path().display());
        println!("  sessions:        {}", stats.sessions);
        println!("  scraped URLs:    {}", stats.scraped_urls);
        println!("  successful URLs: {}", stats.successful_urls);
        println!("  failed URLs:     {}", stats.failed_urls);
        println!("  checksums:       {}", stats.checksums);
    }

    if args.show_errors {
        for row in maintenance.errors().await? {
            println!(
                "{}\t{}\t{}",
                row.url,
                row.status_code.map_or("-".to_string(), |c| c.to_string()),
                row.error.as_deref().unwrap_or("-")
            );
        }
    }

    if args.show_scraped_urls {
        for row in maintenance.scraped_urls().await? {
            println!(
                "{}\t{}\t{}",
                row.url,
                row.status_code.map_or("-".to_string(), |c| c.to_string()),
                row.target_filename.as_deref().unwrap_or("-")
            );
        }
    }

    if args.show_sessions || args.show_sessions_detailed {
        for session in maintenance.sessions().await? {
            println!(
                "{}\t{}\t{}\t{} ok / {} failed\t{}",
                session.id,
                session.status.as_str(),
                session.start_url,
                session.pages_success,
                session.pages_failed,
                session.started_at.to_rfc3339()
            );
            if args.show_sessions_detailed {
                if let Some(ended) = session.ended_at {
                    println!("  ended:  {}", ended.to_rfc3339());
                }
                println!("  config: {}", session.config_json);
            }
        }
    }

    if let Some(id) = args.clear_session {
        let rows = maintenance.clear_session(id, args.delete_files).await?;
        println!("Cleared session {id} ({rows} URL row(s))");
    }

    if args.clear_last_session {
        match maintenance.clear_last_session(args.delete_files).await? {
            Some(id) => println!("Cleared session {id}"),
            None => println!("No sessions to clear"),
        }
    }

    if args.cleanup_sessions {
        let (reclaimed, deleted) = maintenance.cleanup_sessions().await?;
        println!("Reclaimed {reclaimed} orphaned session(s), deleted {deleted} empty session(s)");
    }

    if args.clear_urls {
        let (urls, checksums) = maintenance.clear_urls(args.force_rescrape).await?;
        println!("Cleared {urls} URL row(s), {checksums} checksum(s)");
    }

    Ok(())
}
