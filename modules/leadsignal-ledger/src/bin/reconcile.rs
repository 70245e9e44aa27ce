//! Merge every historical record fragment into one canonical store.
//!
//! Usage:
//!   reconcile --logs-dir logs --out logs/lead_finder_buyers_sentState.json
//!   reconcile old_dmed.csv sentCache.json --out logs/x_sentState.json --handles-only
//!   reconcile --logs-dir logs --dry-run

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadsignal_ledger::{
    collect_fragments, load_fragment, rebuild, same_file, write_canonical, Fragment,
};

#[derive(Parser, Debug)]
#[command(name = "reconcile", about = "Rebuild the canonical outreach record store from history")]
struct Args {
    /// Directory whose *.json and *.csv files are all read as fragments.
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Additional fragment files.
    files: Vec<PathBuf>,

    /// Live store files to overwrite. Existing targets are read first, so
    /// nothing they already hold is lost.
    #[arg(long = "out")]
    out: Vec<PathBuf>,

    /// Import only handles from history. Locators already in the --out
    /// targets are kept.
    #[arg(long)]
    handles_only: bool,

    /// Report the merged counts without writing anything.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.out.is_empty() && !args.dry_run {
        bail!("at least one --out target is required (or pass --dry-run)");
    }
    if args.logs_dir.is_none() && args.files.is_empty() {
        bail!("nothing to reconcile: pass --logs-dir and/or fragment files");
    }

    let is_target = |path: &PathBuf| args.out.iter().any(|out| same_file(out, path));

    let mut history = Vec::new();
    if let Some(dir) = &args.logs_dir {
        info!(dir = %dir.display(), "Scanning history directory");
        history.extend(
            collect_fragments(dir)?
                .into_iter()
                .filter(|f| !is_target(&f.origin)),
        );
    }
    for path in args.files.iter().filter(|p| !is_target(*p)) {
        if history.iter().any(|f: &Fragment| same_file(&f.origin, path)) {
            continue;
        }
        if let Some(fragment) = load_fragment(path)? {
            history.push(fragment);
        }
    }

    // Live targets are read in full; nothing they hold is dropped.
    let mut live = Vec::new();
    for path in args.out.iter().filter(|p| p.exists()) {
        if let Some(fragment) = load_fragment(path)? {
            live.push(fragment);
        }
    }

    let canonical = rebuild(&history, &live, args.handles_only);
    let fragments = history.len() + live.len();

    info!(
        fragments,
        handles = canonical.handle_count(),
        locators = canonical.locator_count(),
        entries = canonical.entry_count(),
        "Reconciliation complete"
    );

    if args.dry_run {
        info!("Dry run, nothing written");
        return Ok(());
    }

    write_canonical(&canonical, &args.out)?;
    Ok(())
}
