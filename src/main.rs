use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use article_pipeline::config::{self, AppConfig};
use article_pipeline::coordinator::{self, StoreHandle};
use article_pipeline::extractor::HttpExtractor;
use article_pipeline::fetch::HttpFetcher;
use article_pipeline::lock::{self, StoreLock};
use article_pipeline::log::{self as applog, parse_log_level};
use article_pipeline::pipeline::Pipeline;
use article_pipeline::store;
use article_pipeline::types::{
    parse_field_spec, parse_model_preference, IntakeOutcome, NewTemplate, ResultsQuery,
    TemplateUpdate,
};
use article_pipeline::{intake, orchestrator, recovery};

type HttpPipeline = Pipeline<HttpFetcher, HttpExtractor>;

#[derive(Parser)]
#[command(
    name = "article-pipeline",
    about = "Article download and AI field-extraction pipeline"
)]
struct Cli {
    /// Working directory; the store path resolves from here
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to config file (defaults to {root}/article-pipeline.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug); RUST_LOG overrides
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and an empty store
    Init,
    /// Run the pipeline until SIGINT/SIGTERM; SIGUSR1 triggers a resume
    Serve,
    /// Process every queued article once, then exit
    Resume,
    /// Manage accounts
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
    /// Manage dimension templates
    Dimension {
        #[command(subcommand)]
        command: DimensionCommand,
    },
    /// Submit article URLs and wait for them to be processed
    Submit {
        /// Account that owns the articles
        #[arg(long)]
        account: String,
        /// Article URLs
        urls: Vec<String>,
        /// File with one URL per line
        #[arg(long)]
        file: Option<PathBuf>,
        /// Only queue the URLs; a later `serve` or `resume` processes them
        #[arg(long)]
        no_wait: bool,
    },
    /// Extract an article with one dimension, or with every locked dimension
    Extract {
        /// Article ID
        article: String,
        /// Dimension template ID (all locked dimensions when omitted)
        #[arg(long)]
        dimension: Option<String>,
    },
    /// Show article counts and states for an account
    Status {
        #[arg(long)]
        account: String,
    },
    /// Show extraction results for an article or a dimension
    Results {
        #[arg(long, conflicts_with = "dimension", required_unless_present = "dimension")]
        article: Option<String>,
        #[arg(long)]
        dimension: Option<String>,
        /// Case-insensitive search over extracted values
        #[arg(long, requires = "dimension")]
        keyword: Option<String>,
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value = "20")]
        page_size: usize,
    },
    /// Export a dimension's completed results as JSON
    Export {
        /// Dimension template ID
        dimension: String,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Create an account
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
enum DimensionCommand {
    /// Create an unlocked dimension template
    Add {
        #[arg(long)]
        account: String,
        name: String,
        /// Field spec `name[:label[:type[:required]]]`, repeatable
        #[arg(long = "field", required = true, action = clap::ArgAction::Append)]
        fields: Vec<String>,
        /// Model preference (haiku, sonnet)
        #[arg(long, default_value = "haiku")]
        model: String,
        /// Custom prompt; `{fields}` and `{content}` are substituted
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Lock a template so articles are extracted with it
    Lock { id: String },
    /// Unlock a template to edit its fields
    Unlock { id: String },
    /// Append fields to a locked template
    AddFields {
        id: String,
        #[arg(long = "field", required = true, action = clap::ArgAction::Append)]
        fields: Vec<String>,
    },
    /// Change a template's model or description; allowed while locked
    Edit {
        id: String,
        /// Model preference (haiku, sonnet)
        #[arg(long)]
        model: Option<String>,
        /// New description; an empty string clears it
        #[arg(long)]
        description: Option<String>,
    },
    /// Set the extraction order of an account's templates
    Reorder {
        #[arg(long)]
        account: String,
        /// Template IDs, first extracted first
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// List an account's templates
    List {
        #[arg(long)]
        account: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match parse_log_level(&cli.log_level) {
        Ok(level) => applog::init(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let root = &cli.root;
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Init => handle_init(root),
        Commands::Serve => handle_serve(root, config_path).await,
        Commands::Resume => handle_resume(root, config_path).await,
        Commands::Account { command } => handle_account(root, config_path, command).await,
        Commands::Dimension { command } => handle_dimension(root, config_path, command).await,
        Commands::Submit {
            account,
            urls,
            file,
            no_wait,
        } => handle_submit(root, config_path, &account, urls, file, no_wait).await,
        Commands::Extract { article, dimension } => {
            handle_extract(root, config_path, &article, dimension).await
        }
        Commands::Status { account } => handle_status(root, config_path, &account).await,
        Commands::Results {
            article,
            dimension,
            keyword,
            page,
            page_size,
        } => {
            handle_results(
                root,
                config_path,
                article,
                dimension,
                keyword,
                page,
                page_size,
            )
            .await
        }
        Commands::Export { dimension, output } => {
            handle_export(root, config_path, &dimension, output).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// --- Setup ---

/// Config, a running store actor, and the lock that makes this process its
/// only owner. Drop order: handle first, then await the actor, then the lock.
struct Session {
    config: AppConfig,
    store: StoreHandle,
    store_task: tokio::task::JoinHandle<()>,
    _lock: StoreLock,
}

impl Session {
    async fn close(self) {
        let Session {
            store,
            store_task,
            _lock,
            ..
        } = self;
        drop(store);
        if let Err(e) = store_task.await {
            warn!("Store task panicked: {:?}", e);
        }
    }
}

fn resolve_store_path(root: &Path, config_path: Option<&Path>, config: &AppConfig) -> PathBuf {
    let base = match config_path {
        Some(p) => p.parent().unwrap_or(Path::new(".")).to_path_buf(),
        None => root.to_path_buf(),
    };
    base.join(&config.store.path)
}

fn open_session(root: &Path, config_path: Option<&Path>) -> Result<Session, String> {
    let config = config::load_config_from(config_path, root)?;
    let store_path = resolve_store_path(root, config_path, &config);
    let store_dir = store_path
        .parent()
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let lock = lock::try_acquire(&store_dir)?;
    let data = store::load(&store_path).map_err(|e| e.to_string())?;
    let (store, store_task) = coordinator::spawn_store(data, Some(store_path));

    Ok(Session {
        config,
        store,
        store_task,
        _lock: lock,
    })
}

fn build_pipeline(session: &Session) -> Result<HttpPipeline, String> {
    let fetcher = HttpFetcher::new(&session.config.fetch).map_err(|e| e.to_string())?;
    let extractor =
        HttpExtractor::from_config(&session.config.extraction).map_err(|e| e.to_string())?;
    Ok(Pipeline::new(
        session.store.clone(),
        fetcher,
        extractor,
        &session.config,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize output: {}", e))?;
    println!("{}", json);
    Ok(())
}

/// SIGINT/SIGTERM set the first flag, SIGUSR1 the second.
fn install_signal_handlers() -> Result<(Arc<AtomicBool>, Arc<AtomicBool>), String> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let resume = Arc::new(AtomicBool::new(false));

    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::clone(&resume))
        .map_err(|e| format!("Failed to register SIGUSR1 handler: {}", e))?;

    Ok((shutdown, resume))
}

// --- Handlers ---

fn handle_init(root: &Path) -> Result<(), String> {
    let config_path = root.join(config::CONFIG_FILE_NAME);
    if config_path.exists() {
        println!("{} already exists", config_path.display());
    } else {
        fs::write(&config_path, config::default_config_toml())
            .map_err(|e| format!("Failed to write {}: {}", config_path.display(), e))?;
        println!("Created {}", config_path.display());
    }

    let config = config::load_config(root)?;
    let store_path = resolve_store_path(root, None, &config);
    if !store_path.exists() {
        store::save(&store_path, &store::StoreFile::default()).map_err(|e| e.to_string())?;
        println!("Created {}", store_path.display());
    }

    Ok(())
}

async fn handle_serve(root: &Path, config_path: Option<&Path>) -> Result<(), String> {
    let (shutdown, resume_requested) = install_signal_handlers()?;
    let session = open_session(root, config_path)?;
    let pipeline = build_pipeline(&session)?;

    info!(
        max_concurrent = pipeline.limiter().capacity(),
        "Pipeline started"
    );

    let startup = pipeline.clone();
    pipeline.spawn_supervised("startup", async move {
        recovery::startup(&startup).await.map(|_| ())
    });

    while !shutdown.load(Ordering::SeqCst) {
        if resume_requested.swap(false, Ordering::SeqCst) {
            info!("Resume requested");
            let task = pipeline.clone();
            pipeline.spawn_supervised("resume", async move {
                recovery::resume(&task).await.map(|_| ())
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!(
        running = pipeline.limiter().running_count(),
        "Shutting down; waiting for running articles to finish"
    );
    pipeline.shutdown().await;
    drop(pipeline);
    session.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn handle_resume(root: &Path, config_path: Option<&Path>) -> Result<(), String> {
    let session = open_session(root, config_path)?;
    let pipeline = build_pipeline(&session)?;

    let (requeued, interrupted) = session
        .store
        .requeue_orphans()
        .await
        .map_err(|e| e.to_string())?;
    if requeued > 0 || interrupted > 0 {
        warn!(requeued, interrupted, "Recovered work left in flight");
    }

    let submitted = recovery::resume(&pipeline)
        .await
        .map_err(|e| e.to_string())?;
    pipeline.wait_idle().await;
    println!("Processed {} queued article(s)", submitted);

    drop(pipeline);
    session.close().await;
    Ok(())
}

async fn handle_account(
    root: &Path,
    config_path: Option<&Path>,
    command: AccountCommand,
) -> Result<(), String> {
    let session = open_session(root, config_path)?;
    let result = match command {
        AccountCommand::Add { name, description } => session
            .store
            .create_account(&name, description)
            .await
            .map_err(|e| e.to_string())
            .and_then(|account| print_json(&account)),
    };
    session.close().await;
    result
}

async fn handle_dimension(
    root: &Path,
    config_path: Option<&Path>,
    command: DimensionCommand,
) -> Result<(), String> {
    let session = open_session(root, config_path)?;
    let store = &session.store;

    let result = match command {
        DimensionCommand::Add {
            account,
            name,
            fields,
            model,
            prompt,
            description,
        } => {
            let fields = fields
                .iter()
                .map(String::as_str)
                .map(parse_field_spec)
                .collect::<Result<Vec<_>, _>>();
            match (fields, parse_model_preference(&model)) {
                (Ok(fields), Ok(model_preference)) => store
                    .create_template(NewTemplate {
                        account_id: account,
                        name,
                        description,
                        fields,
                        model_preference,
                        custom_prompt: prompt,
                    })
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|t| print_json(&t)),
                (Err(e), _) | (_, Err(e)) => Err(e),
            }
        }
        DimensionCommand::Lock { id } => store
            .update_template(&id, TemplateUpdate::Lock)
            .await
            .map_err(|e| e.to_string())
            .map(|t| println!("Locked {} ({})", t.name, t.id)),
        DimensionCommand::Unlock { id } => store
            .update_template(&id, TemplateUpdate::Unlock)
            .await
            .map_err(|e| e.to_string())
            .map(|t| println!("Unlocked {} ({})", t.name, t.id)),
        DimensionCommand::AddFields { id, fields } => {
            match fields
                .iter()
                .map(String::as_str)
                .map(parse_field_spec)
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(fields) => store
                    .update_template(&id, TemplateUpdate::AddFields(fields))
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|t| print_json(&t)),
                Err(e) => Err(e),
            }
        }
        DimensionCommand::Edit {
            id,
            model,
            description,
        } => edit_dimension(store, &id, model.as_deref(), description).await,
        DimensionCommand::Reorder { account, ids } => store
            .reorder_templates(&account, ids)
            .await
            .map_err(|e| e.to_string())
            .map(|templates| {
                for t in templates {
                    println!("{:>3}  {}  {}", t.sort_order, t.id, t.name);
                }
            }),
        DimensionCommand::List { account } => store
            .list_templates(&account)
            .await
            .map_err(|e| e.to_string())
            .map(|templates| {
                for t in templates {
                    let state = match (t.is_active, t.is_locked) {
                        (false, _) => "inactive",
                        (true, true) => "locked",
                        (true, false) => "unlocked",
                    };
                    println!(
                        "{:>3}  {}  {:<10} {} ({} fields, {})",
                        t.sort_order,
                        t.id,
                        state,
                        t.name,
                        t.fields.len(),
                        t.model_preference
                    );
                }
            }),
    };

    session.close().await;
    result
}

async fn edit_dimension(
    store: &StoreHandle,
    id: &str,
    model: Option<&str>,
    description: Option<String>,
) -> Result<(), String> {
    let mut updates = Vec::new();
    if let Some(model) = model {
        updates.push(TemplateUpdate::SetModel(parse_model_preference(model)?));
    }
    if let Some(description) = description {
        let description = Some(description).filter(|d| !d.trim().is_empty());
        updates.push(TemplateUpdate::SetDescription(description));
    }
    if updates.is_empty() {
        return Err("Nothing to change: pass --model or --description".to_string());
    }

    let mut template = None;
    for update in updates {
        template = Some(
            store
                .update_template(id, update)
                .await
                .map_err(|e| e.to_string())?,
        );
    }
    match template {
        Some(t) => print_json(&t),
        None => Ok(()),
    }
}

fn read_url_file(path: &Path) -> Result<Vec<String>, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn handle_submit(
    root: &Path,
    config_path: Option<&Path>,
    account: &str,
    mut urls: Vec<String>,
    file: Option<PathBuf>,
    no_wait: bool,
) -> Result<(), String> {
    if let Some(path) = file {
        urls.extend(read_url_file(&path)?);
    }
    if urls.is_empty() {
        return Err("No URLs given".to_string());
    }

    let session = open_session(root, config_path)?;
    let pipeline = build_pipeline(&session)?;

    let summary = intake::submit_batch(&pipeline, account, &urls)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&summary)?;

    if no_wait {
        pipeline.shutdown().await;
    } else if summary.accepted > 0 {
        pipeline.wait_idle().await;
        for outcome in &summary.outcomes {
            if let IntakeOutcome::Accepted { article_id, .. } = outcome {
                match session.store.get_article(article_id).await {
                    Ok(article) => println!(
                        "{}  {:<11} {} result(s)  {}",
                        article.id,
                        article.status.to_string(),
                        article.extraction_count,
                        article.error_message.as_deref().unwrap_or("")
                    ),
                    Err(e) => println!("{}  {}", article_id, e),
                }
            }
        }
    }

    drop(pipeline);
    session.close().await;
    Ok(())
}

async fn handle_extract(
    root: &Path,
    config_path: Option<&Path>,
    article_id: &str,
    dimension: Option<String>,
) -> Result<(), String> {
    let session = open_session(root, config_path)?;
    let pipeline = build_pipeline(&session)?;

    let dispatched = match dimension {
        Some(template_id) => orchestrator::begin_extraction(&pipeline, article_id, &template_id)
            .await
            .map_err(|e| e.to_string())
            .and_then(|placeholder| print_json(&placeholder)),
        None => orchestrator::extract_all(&pipeline, article_id)
            .await
            .map_err(|e| e.to_string())
            .and_then(|summary| print_json(&summary)),
    };

    if dispatched.is_ok() {
        pipeline.wait_idle().await;
        let results = session
            .store
            .results_by_article(article_id)
            .await
            .map_err(|e| e.to_string())?;
        print_json(&results)?;
    }

    drop(pipeline);
    session.close().await;
    dispatched
}

async fn handle_status(
    root: &Path,
    config_path: Option<&Path>,
    account_id: &str,
) -> Result<(), String> {
    let session = open_session(root, config_path)?;
    let store = &session.store;

    let result = async {
        let account = store
            .get_account(account_id)
            .await
            .map_err(|e| e.to_string())?;
        let counts = store
            .status_counts(account_id)
            .await
            .map_err(|e| e.to_string())?;
        let articles = store
            .list_articles(account_id)
            .await
            .map_err(|e| e.to_string())?;

        println!("Account: {} ({})", account.name, account.id);
        for (status, count) in counts {
            println!("  {:<11} {}", status.to_string(), count);
        }
        println!();
        for article in articles {
            println!(
                "{}  {:<11} {:>3}  {}  {}",
                article.id,
                article.status.to_string(),
                article.extraction_count,
                article.title.as_deref().unwrap_or(&article.url),
                article.error_message.as_deref().unwrap_or("")
            );
        }
        Ok::<(), String>(())
    }
    .await;

    session.close().await;
    result
}

async fn handle_results(
    root: &Path,
    config_path: Option<&Path>,
    article: Option<String>,
    dimension: Option<String>,
    keyword: Option<String>,
    page: usize,
    page_size: usize,
) -> Result<(), String> {
    let session = open_session(root, config_path)?;
    let store = &session.store;

    let result = match (article, dimension) {
        (Some(article_id), _) => store
            .results_by_article(&article_id)
            .await
            .map_err(|e| e.to_string())
            .and_then(|results| print_json(&results)),
        (None, Some(template_id)) => store
            .results_by_template(ResultsQuery {
                template_id,
                page,
                page_size,
                keyword,
            })
            .await
            .map_err(|e| e.to_string())
            .and_then(|page| print_json(&page)),
        (None, None) => Err("Pass --article or --dimension".to_string()),
    };

    session.close().await;
    result
}

async fn handle_export(
    root: &Path,
    config_path: Option<&Path>,
    template_id: &str,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let session = open_session(root, config_path)?;

    let result = async {
        let rows = session
            .store
            .export_template(template_id)
            .await
            .map_err(|e| e.to_string())?;
        let json = serde_json::to_string_pretty(&rows)
            .map_err(|e| format!("Failed to serialize export: {}", e))?;
        match output {
            Some(path) => {
                fs::write(&path, json)
                    .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
                println!("Exported {} record(s) to {}", rows.len(), path.display());
            }
            None => println!("{}", json),
        }
        Ok::<(), String>(())
    }
    .await;

    session.close().await;
    result
}
