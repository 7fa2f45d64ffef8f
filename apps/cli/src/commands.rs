//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use leakscan_core::{ScanSummary, mark_fragment, run_github_scan, run_gist_scan};
use leakscan_shared::{
    AppConfig, KeywordKind, REJECT_NONE, ScanConfig, expand_home, init_config, load_config,
    validate_tokens,
};
use leakscan_storage::{BlobStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Leakscan — monitor public code hosting for leaked secrets.
#[derive(Parser)]
#[command(
    name = "leakscan",
    version,
    about = "Scan GitHub and gists for leaked secrets and triage the findings.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a scan against one source.
    Scan {
        /// Source to scan.
        source: ScanSource,
    },

    /// Manage search keywords.
    Keyword {
        #[command(subcommand)]
        action: KeywordAction,
    },

    /// Manage rejection rules.
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Page through extracted fragments.
    Fragments {
        /// Source to list fragments for.
        #[arg(long, default_value = "github")]
        source: ScanSource,

        /// Rule id or name to filter on (defaults to unreviewed).
        #[arg(long, default_value = "none")]
        status: String,

        /// Page number, zero-based.
        #[arg(long, default_value = "0")]
        page: u32,

        /// Fragments per page.
        #[arg(long, default_value = "20")]
        page_size: u32,
    },

    /// Classify one fragment by rule id or name.
    Mark {
        /// Fragment id.
        fragment_id: i64,

        /// Rule id, or one of the rule names (e.g. verified, manual).
        status: String,
    },

    /// Show report counts per source and lifecycle status.
    Status,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Scan sources.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum ScanSource {
    Github,
    Gist,
}

impl ScanSource {
    fn as_str(&self) -> &'static str {
        match self {
            ScanSource::Github => "github",
            ScanSource::Gist => "gist",
        }
    }
}

/// Keyword subcommands.
#[derive(Subcommand)]
pub(crate) enum KeywordAction {
    /// Add a keyword.
    Add {
        /// Keyword text.
        value: String,

        /// Keyword kind: searchable (drives search queries) or inner
        /// (only matched inside fetched texts).
        #[arg(long, default_value = "searchable")]
        kind: String,
    },
    /// List all keywords.
    List,
    /// Remove a keyword by value.
    Remove {
        /// Keyword text.
        value: String,
    },
}

/// Rule subcommands.
#[derive(Subcommand)]
pub(crate) enum RuleAction {
    /// Add a rejection rule.
    Add {
        /// Rule name.
        name: String,

        /// Regex applied by the rejection filter.
        pattern: String,
    },
    /// List all rules in evaluation order.
    List,
    /// Remove a rule by id.
    Remove {
        /// Rule id.
        id: i64,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leakscan=info",
        1 => "leakscan=debug",
        _ => "leakscan=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Scan { source } => cmd_scan(source).await,
        Command::Keyword { action } => match action {
            KeywordAction::Add { value, kind } => cmd_keyword_add(&value, &kind).await,
            KeywordAction::List => cmd_keyword_list().await,
            KeywordAction::Remove { value } => cmd_keyword_remove(&value).await,
        },
        Command::Rule { action } => match action {
            RuleAction::Add { name, pattern } => cmd_rule_add(&name, &pattern).await,
            RuleAction::List => cmd_rule_list().await,
            RuleAction::Remove { id } => cmd_rule_remove(id).await,
        },
        Command::Fragments {
            source,
            status,
            page,
            page_size,
        } => cmd_fragments(source, &status, page, page_size).await,
        Command::Mark {
            fragment_id,
            status,
        } => cmd_mark(fragment_id, &status).await,
        Command::Status => cmd_status().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Open storage and the blob store from the resolved config.
async fn open_stores(config: &AppConfig) -> Result<(Arc<Storage>, BlobStore)> {
    let db_path = expand_home(&config.storage.db_path);
    let storage = Arc::new(Storage::open(&db_path).await?);
    let blobs = BlobStore::open(expand_home(&config.storage.content_dir))?;
    Ok((storage, blobs))
}

/// Resolve a `--status`/mark argument to a rule id.
async fn resolve_rule(storage: &Storage, status: &str) -> Result<i64> {
    let rules = storage.all_rules().await?;
    if let Ok(id) = status.parse::<i64>() {
        if rules.iter().any(|r| r.id == id) {
            return Ok(id);
        }
        return Err(eyre!("no rule with id {id}"));
    }
    rules
        .iter()
        .find(|r| r.name == status)
        .map(|r| r.id)
        .ok_or_else(|| eyre!("no rule named '{status}'"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_scan(source: ScanSource) -> Result<()> {
    let config = load_config()?;
    validate_tokens(&config)?;
    let (storage, blobs) = open_stores(&config).await?;
    let scan_config = ScanConfig::from(&config);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, draining");
                cancel.cancel();
            }
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("valid spinner template"),
    );
    spinner.set_message(format!("scanning {}", source.as_str()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let summary: ScanSummary = match source {
        ScanSource::Github => run_github_scan(storage, blobs, &scan_config, &cancel).await?,
        ScanSource::Gist => run_gist_scan(storage, blobs, &scan_config, &cancel).await?,
    };
    spinner.finish_and_clear();

    println!("Scan finished: {}", source.as_str());
    println!("  requests:    {}", summary.requests);
    println!("  responses:   {}", summary.responses);
    println!("  skipped:     {}", summary.skipped);
    println!("  texts:       {}", summary.texts);
    println!("  fragments:   {}", summary.fragments);
    println!("  new reports: {}", summary.new_reports);
    Ok(())
}

async fn cmd_keyword_add(value: &str, kind: &str) -> Result<()> {
    let kind: KeywordKind = kind.parse()?;
    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;
    let id = storage.insert_keyword(value, kind).await?;
    println!("Added keyword {id}: {value} ({})", kind.as_str());
    Ok(())
}

async fn cmd_keyword_list() -> Result<()> {
    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;
    let keywords = storage.all_keywords().await?;
    if keywords.is_empty() {
        println!("No keywords configured.");
        return Ok(());
    }
    for keyword in keywords {
        println!("{:>4}  {:<12} {}", keyword.id, keyword.kind.as_str(), keyword.value);
    }
    Ok(())
}

async fn cmd_keyword_remove(value: &str) -> Result<()> {
    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;
    storage.delete_keyword(value).await?;
    println!("Removed keyword: {value}");
    Ok(())
}

async fn cmd_rule_add(name: &str, pattern: &str) -> Result<()> {
    // Fail here rather than at the next scan
    regex::Regex::new(pattern).map_err(|e| eyre!("invalid pattern: {e}"))?;

    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;
    let id = storage.insert_rule(name, pattern).await?;
    println!("Added rule {id}: {name}");
    Ok(())
}

async fn cmd_rule_list() -> Result<()> {
    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;
    for rule in storage.all_rules().await? {
        if rule.pattern.is_empty() {
            println!("{:>4}  {:<16} (classification)", rule.id, rule.name);
        } else {
            println!("{:>4}  {:<16} {}", rule.id, rule.name, rule.pattern);
        }
    }
    Ok(())
}

async fn cmd_rule_remove(id: i64) -> Result<()> {
    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;
    storage.delete_rule(id).await?;
    println!("Removed rule {id}");
    Ok(())
}

async fn cmd_fragments(source: ScanSource, status: &str, page: u32, page_size: u32) -> Result<()> {
    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;
    let reject_id = resolve_rule(&storage, status).await?;

    let total = storage
        .count_fragments_by_reject(source.as_str(), reject_id)
        .await?;
    let fragments = storage
        .fragments_by_reject(source.as_str(), reject_id, page_size, page * page_size)
        .await?;

    println!(
        "{total} fragment(s) for {} with status '{status}' (page {page}):",
        source.as_str()
    );
    for fragment in fragments {
        let preview: String = fragment.text.chars().take(80).collect();
        println!(
            "{:>6}  report {:>5}  {}",
            fragment.id,
            fragment.report_id,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

async fn cmd_mark(fragment_id: i64, status: &str) -> Result<()> {
    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;
    let reject_id = resolve_rule(&storage, status).await?;
    mark_fragment(&storage, fragment_id, reject_id).await?;
    println!("Fragment {fragment_id} marked '{status}'");
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let (storage, _) = open_stores(&config).await?;

    for source in ["github", "gist"] {
        let counts = storage.report_status_counts(source).await?;
        println!("{source}:");
        if counts.is_empty() {
            println!("  (no reports)");
            continue;
        }
        for (status, count) in counts {
            println!("  {status:<12} {count}");
        }
        let unreviewed = storage.count_fragments_by_reject(source, REJECT_NONE).await?;
        println!("  unreviewed fragments: {unreviewed}");
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
