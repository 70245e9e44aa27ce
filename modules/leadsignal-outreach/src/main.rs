use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use apify_client::ApifyClient;
use leadsignal_common::{Config, SourceKind};
use leadsignal_ledger::{RecordStore, StorePaths};
use leadsignal_outreach::{
    FailureClassifier, MessageComposer, Outreach, OutreachSettings, RedditChannel,
};
use leadsignal_scout::{
    load_ruleset, ApifySource, ContentSource, RedditSource, Scout, ThrottledSource,
};
use reddit_client::{RedditClient, RedditOptions};

#[derive(Parser)]
#[command(about = "Find leads on Reddit and contact each identity at most once")]
struct Cli {
    /// Ruleset id to run (overrides RULESET)
    #[arg(long)]
    ruleset: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("LeadSignal starting...");

    let mut config = Config::from_env()?;
    if let Some(ruleset) = cli.ruleset {
        config.ruleset = ruleset;
    }
    config.log_redacted();

    // Ruleset
    let mut ruleset = load_ruleset(&config.ruleset_path())?;
    if let Some(max_age) = config.freshness {
        info!(hours = max_age.num_hours(), "Overriding ruleset freshness window");
        ruleset = ruleset.with_max_age(max_age);
    }
    let composer = MessageComposer::new(ruleset.templates.clone())?;
    let ruleset = Arc::new(ruleset);

    // Reddit (always needed for sending)
    let reddit = Arc::new(RedditClient::new(RedditOptions {
        client_id: config.reddit.client_id.clone(),
        client_secret: config.reddit.client_secret.clone(),
        username: config.reddit.username.clone(),
        password: config.reddit.password.clone(),
        user_agent: config.reddit.user_agent.clone(),
    })?);

    // Content source
    let source: Arc<dyn ContentSource> = match config.content_source {
        SourceKind::Reddit => Arc::new(ThrottledSource::new(RedditSource::new(reddit.clone()))),
        SourceKind::Apify => {
            let token = config
                .apify_api_key
                .clone()
                .context("APIFY_API_KEY is required when CONTENT_SOURCE=apify")?;
            Arc::new(ThrottledSource::new(ApifySource::new(ApifyClient::new(token))))
        }
    };
    let scout = Scout::new(source, ruleset);

    // Record store
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;
    let store = RecordStore::open(StorePaths {
        snapshot: config.state_path(),
        audit_log: Some(config.audit_path()),
    });

    let mut outreach = Outreach::new(
        Arc::new(scout),
        Arc::new(RedditChannel::new(reddit)),
        store,
        composer,
        FailureClassifier::new(&config.permanent_failure_codes),
        OutreachSettings::from_config(&config),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_for_shutdown(shutdown.clone()));

    if cli.once {
        let stats = outreach.run_cycle(&shutdown).await?;
        info!("Single cycle complete. {stats}");
    } else {
        outreach.run(shutdown).await;
    }

    if let Err(e) = outreach.store().flush() {
        warn!(error = %e, "Final record store flush failed");
    }
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C, or SIGTERM on unix.
async fn watch_for_shutdown(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown requested, finishing current attempt");
    shutdown.cancel();
}
