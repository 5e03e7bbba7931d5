use anyhow::Result;
use clap::{ArgAction, Parser};
use custodian::config::Config;
use custodian::executor::{AssumeYes, Confirm, Interactive};
use custodian::pipeline;
use custodian::utils::readable_display;
use log::{error, info};
use std::path::PathBuf;
use time::macros::format_description;
use time::OffsetDateTime;

/// CLI args
#[derive(Parser, Debug)]
#[command(
    name = "custodian",
    version,
    about = "Maintain large file trees: duplicates, orphans, date reorganization, permissions, ownership. Moves into a recycle bin, never deletes."
)]
struct Cli {
    /// Config file with one or more [[roots]] tables.
    /// Defaults to ./custodian.toml, then the per-user config dir.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Apply every operation without prompting.
    #[arg(long, action = ArgAction::SetTrue)]
    yes: bool,

    /// Print the plan and change nothing.
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(0) => {}
        Ok(failed) => {
            error!("{failed} root(s) failed");
            std::process::exit(1);
        }
        Err(err) => {
            error!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<usize> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_location);
    // configuration problems are fatal; everything later is per root
    let config = Config::load(&config_path)?;

    let now = OffsetDateTime::now_utc();
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    println!("# custodian @ {}", now.format(&fmt).unwrap_or_default());
    println!(
        "# Mode: {}",
        if cli.dry_run {
            "DRY-RUN (no changes)"
        } else if cli.yes {
            "APPLY (no prompts!)"
        } else {
            "interactive"
        }
    );

    let mut failed = 0;
    for root in &config.roots {
        println!("# Root: {}", readable_display(&root.scan_path));
        let mut confirm: Box<dyn Confirm> = if cli.yes {
            Box::new(AssumeYes)
        } else {
            Box::new(Interactive)
        };
        match pipeline::run_root(root, confirm.as_mut(), cli.dry_run) {
            Ok(summary) => {
                info!(
                    "root {}: {} planned, {} applied, {} skipped, {} failed, {} bytes reclaimed",
                    readable_display(&root.scan_path),
                    summary.planned + summary.post_planned,
                    summary.stats.applied + summary.post_stats.applied,
                    summary.stats.skipped + summary.post_stats.skipped,
                    summary.stats.failed + summary.post_stats.failed,
                    summary.stats.bytes_reclaimed + summary.post_stats.bytes_reclaimed,
                );
            }
            Err(err) => {
                // one broken root must not stop the others
                error!("root {} failed: {err:#}", readable_display(&root.scan_path));
                failed += 1;
            }
        }
    }
    Ok(failed)
}
