use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use release_bot::changelog;
use release_bot::config::{self, BotConfig};
use release_bot::domain::SemVer;
use release_bot::events::{parse_payload, PollingSource};
use release_bot::git::{Git2WorkingCopy, WorktreeFiles};
use release_bot::lease::CheckoutLease;
use release_bot::platform::GhCliPlatform;
use release_bot::publish::TwineIndex;
use release_bot::state::StateTracker;
use release_bot::{resolver, trigger, ui};
use release_bot::{Collaborators, ReleaseBot, ReleasePipeline};

#[derive(Parser)]
#[command(
    name = "release-bot",
    version,
    about = "Cut releases from merged release pull requests and release-request issues"
)]
struct Args {
    #[arg(short, long, global = true, help = "Custom configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the repository and release on request
    Run {
        #[arg(long, help = "Handle one batch of events and exit")]
        once: bool,

        #[arg(long, help = "Compute and validate, but change nothing upstream")]
        dry_run: bool,

        #[arg(long, help = "Only consider pull requests merged after this RFC 3339 time")]
        since: Option<DateTime<Utc>>,
    },
    /// Handle a single webhook payload
    Webhook {
        #[arg(long, help = "Webhook event type (X-GitHub-Event); inferred when omitted")]
        event: Option<String>,

        #[arg(long, help = "Compute and validate, but change nothing upstream")]
        dry_run: bool,

        /// JSON payload file
        payload: PathBuf,
    },
    /// Show the last recorded release
    Status,
    /// Show how a title would be understood
    Classify {
        title: String,

        #[arg(long, help = "Latest released version to resolve bumps against")]
        latest: Option<String>,
    },
    /// Print the changelog section of one version
    Changelog {
        version: String,

        #[arg(long, help = "Changelog file (defaults to the configured one)")]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(if args.debug { "debug" } else { "info" })?;

    let config = match config::load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            ui::display_error(&format!("Error loading config: {}", e));
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Run {
            once,
            dry_run,
            since,
        } => run(config.with_dry_run(dry_run), once, since),
        Command::Webhook {
            event,
            dry_run,
            payload,
        } => webhook(config.with_dry_run(dry_run), event.as_deref(), &payload),
        Command::Status => status(&config),
        Command::Classify { title, latest } => classify(&title, latest.as_deref()),
        Command::Changelog { version, file } => {
            show_changelog(&version, file.as_deref().unwrap_or(config.changelog_file.as_path()))
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

/// Wire the real collaborators for the configured repository
fn build_bot(config: &BotConfig) -> Result<ReleaseBot> {
    config.validate()?;
    let lease = CheckoutLease::acquire(&config.lease_file())?;

    let checkout = config.checkout_dir();
    ui::display_status(&format!(
        "Using checkout of {} at {}",
        config.slug(),
        checkout.display()
    ));
    let working_copy = Git2WorkingCopy::open_or_clone(&checkout, &config.clone_url())
        .with_context(|| format!("cannot prepare checkout {}", checkout.display()))?;

    let platform = GhCliPlatform::new(
        &config.repository_owner,
        &config.repository_name,
        config.default_branch.clone(),
        config.tag_pattern()?,
    );
    let collaborators = Collaborators {
        working_copy: Box::new(working_copy),
        files: Box::new(WorktreeFiles::new(&checkout)),
        platform: Arc::new(platform),
        index: Arc::new(TwineIndex::new(config.publish_timeout())),
    };
    let state = StateTracker::open(config.state_file())?;
    let pipeline = ReleasePipeline::new(config.clone(), collaborators, state)?;
    Ok(ReleaseBot::new(pipeline).with_lease(lease))
}

fn run(config: BotConfig, once: bool, since: Option<DateTime<Utc>>) -> Result<()> {
    if config.dry_run {
        ui::display_status("Dry run: nothing will be changed upstream");
    }
    let bot = build_bot(&config)?;

    // First start watches from now on instead of replaying the whole history
    let cursor = since.or_else(|| bot.cursor()).unwrap_or_else(Utc::now);
    let platform = Arc::new(GhCliPlatform::new(
        &config.repository_owner,
        &config.repository_name,
        config.default_branch.clone(),
        config.tag_pattern()?,
    ));
    let mut source = PollingSource::new(platform, config.call_timeout(), Some(cursor));
    if config.github_username.is_none() {
        source = source.without_issues();
    }

    if once {
        for outcome in bot.run_once(&mut source)? {
            ui::display_outcome(&outcome);
        }
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        handle.store(true, Ordering::SeqCst);
    }) {
        warn!("cannot install Ctrl-C handler, Ctrl-C will not stop the loop: {}", e);
    }
    bot.run(&mut source, &stop)?;
    Ok(())
}

fn webhook(config: BotConfig, event_type: Option<&str>, payload: &Path) -> Result<()> {
    let body = fs::read_to_string(payload)
        .with_context(|| format!("cannot read {}", payload.display()))?;
    let Some(event) = parse_payload(event_type, &body)? else {
        ui::display_status("Payload does not describe a merged pull request or a new issue");
        return Ok(());
    };

    let bot = build_bot(&config)?;
    let outcome = bot.on_event(&event);
    ui::display_outcome(&outcome);
    if outcome.is_failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn status(config: &BotConfig) -> Result<()> {
    let state = StateTracker::open(config.state_file())?;
    ui::display_record(state.status());
    for pending in state.pending() {
        ui::display_status(&format!(
            "Waiting for #{} to release {}",
            pending.pr_number, pending.version
        ));
    }
    Ok(())
}

fn classify(title: &str, latest: Option<&str>) -> Result<()> {
    let intent = trigger::classify(title)?;
    let latest = latest.map(SemVer::parse).transpose()?;

    let resolved = match intent {
        Some(intent) => match resolver::resolve(latest, intent) {
            Ok(version) => Some(version),
            Err(e) => {
                ui::display_intent(title, Some(&intent), None);
                ui::display_error(&e.to_string());
                std::process::exit(1);
            }
        },
        None => None,
    };
    ui::display_intent(title, intent.as_ref(), resolved);
    Ok(())
}

fn show_changelog(version: &str, file: &Path) -> Result<()> {
    let version = SemVer::parse(version)?;
    let contents =
        fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?;
    let entry = changelog::extract(&contents, version)?;
    ui::display_changelog(&entry);
    Ok(())
}
