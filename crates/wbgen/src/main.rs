use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wbgen_core::checkpoint::ProcessedLog;
use wbgen_core::config::{BotConfig, Credentials, DEFAULT_CONFIG_PATH, load_config};
use wbgen_core::fetch::{FetchOutcome, FetchSettings, fetch_item};
use wbgen_core::generation::{ChatCompletionsClient, GenerationSettings};
use wbgen_core::mediawiki::{
    MediaWikiClient, MediaWikiClientConfig, PublishOutcome, WikiPublishApi,
};
use wbgen_core::prompt::{PromptPolicy, PromptSettings, article_title, build_messages};
use wbgen_core::publish::{RunOptions, RunReport, Services, run_publish_loop};
use wbgen_core::source::AllPagesStream;

#[derive(Debug, Parser)]
#[command(
    name = "wbgen",
    version,
    about = "Makes new wiki articles from structured data in a Wikibase repository"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Raise log verbosity (repeatable)")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Generate and publish articles for unlinked items")]
    Run(RunArgs),
    #[command(about = "Show the normalized record and prompt for one item")]
    Preview(PreviewArgs),
    #[command(about = "Show resolved configuration and checkpoint state")]
    Status,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, value_name = "TEXT", help = "Article title prefix")]
    prefix: Option<String>,
    #[arg(long, help = "Model temperature (default: 0.5)")]
    temperature: Option<f32>,
    #[arg(long, value_name = "ID", help = "Namespace holding the repository items (default: 0)")]
    ns: Option<i32>,
    #[arg(
        long,
        value_name = "SELECTOR",
        help = "'ds' for DeepSeek, 'local:<model>' for a custom endpoint, otherwise an OpenRouter model id"
    )]
    model: Option<String>,
    #[arg(long, value_name = "WIKITEXT", help = "Wikitext added to the start of every page")]
    begin: Option<String>,
    #[arg(long, help = "Number of unprocessed items to handle (default: unlimited)")]
    count: Option<usize>,
    #[arg(long, value_name = "PATH", help = "Processed-items log")]
    checkpoint: Option<PathBuf>,
    #[arg(long, value_name = "strict|relaxed")]
    policy: Option<String>,
    #[arg(long, help = "Generate without publishing or recording")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    item: String,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_config(&config_path)?;

    match cli.command {
        Some(Commands::Run(args)) => run_bot(config, args),
        Some(Commands::Preview(PreviewArgs { item })) => run_preview(&config, &item),
        Some(Commands::Status) => run_status(&config, &config_path),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn apply_run_overrides(config: &mut BotConfig, args: &RunArgs) -> Result<()> {
    if let Some(prefix) = &args.prefix {
        config.run.title_prefix = prefix.clone();
    }
    if let Some(begin) = &args.begin {
        config.run.leading_wikitext = begin.clone();
    }
    if let Some(count) = args.count {
        config.run.count = Some(count);
    }
    if let Some(checkpoint) = &args.checkpoint {
        config.run.checkpoint_path = Some(checkpoint.clone());
    }
    if let Some(ns) = args.ns {
        config.repository.item_namespace = ns;
    }
    if let Some(model) = &args.model {
        config.generation.model = Some(model.clone());
    }
    if let Some(temperature) = args.temperature {
        config.generation.temperature = Some(temperature);
    }
    if let Some(policy) = &args.policy {
        config.generation.prompt_policy = PromptPolicy::parse(policy)?;
    }
    config.validate()
}

fn repository_client(config: &BotConfig) -> Result<MediaWikiClient> {
    let api_url = config.repository_api_url().ok_or_else(|| {
        anyhow!("repository API URL is not configured (set REPO_API_URL or [repository].api_url)")
    })?;
    MediaWikiClient::new(MediaWikiClientConfig::for_api_url(
        &api_url,
        &config.user_agent(),
    ))
}

fn wiki_client(config: &BotConfig) -> Result<MediaWikiClient> {
    let api_url = config
        .wiki_api_url()
        .ok_or_else(|| anyhow!("wiki API URL is not configured (set WIKI_API_URL or [wiki].api_url)"))?;
    MediaWikiClient::new(MediaWikiClientConfig::for_api_url(
        &api_url,
        &config.user_agent(),
    ))
}

/// Stands in for the wiki during dry runs, where nothing is published.
struct NoPublish;

impl WikiPublishApi for NoPublish {
    fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
        Ok(())
    }

    fn create_page(
        &mut self,
        title: &str,
        _content: &str,
        _summary: &str,
    ) -> Result<PublishOutcome> {
        bail!("refusing to publish {title} during a dry run")
    }
}

fn run_bot(mut config: BotConfig, args: RunArgs) -> Result<()> {
    apply_run_overrides(&mut config, &args)?;
    let mut options = RunOptions::from_config(&config);
    options.dry_run = args.dry_run;

    let mut repository = repository_client(&config)?;
    let items = AllPagesStream::new(repository_client(&config)?, config.repository.item_namespace);
    let mut generator = ChatCompletionsClient::new(GenerationSettings::from_config(&config)?)?;
    let checkpoint_path = config.checkpoint_path();
    let mut checkpoint = ProcessedLog::open(&checkpoint_path)?;

    let report = if options.dry_run {
        let mut wiki = NoPublish;
        run_publish_loop(
            items,
            &mut Services {
                repository: &mut repository,
                wiki: &mut wiki,
                generator: &mut generator,
            },
            &mut checkpoint,
            &options,
        )?
    } else {
        let credentials = Credentials::from_env()?;
        let mut wiki = wiki_client(&config)?;
        wiki.login(&credentials.username, &credentials.password)
            .context("failed to log in to the wiki")?;
        info!(username = %credentials.username, "logged in");
        run_publish_loop(
            items,
            &mut Services {
                repository: &mut repository,
                wiki: &mut wiki,
                generator: &mut generator,
            },
            &mut checkpoint,
            &options,
        )?
    };

    println!("wbgen run");
    println!("checkpoint_path: {}", normalize_path(&checkpoint_path));
    println!("namespace: {}", config.repository.item_namespace);
    println!("model: {}", config.model());
    println!("dry_run: {}", options.dry_run);
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("report.offered: {}", report.offered);
    println!("report.already_processed: {}", report.already_processed);
    println!("report.unsuitable: {}", report.unsuitable);
    println!("report.not_eligible: {}", report.not_eligible);
    println!("report.unconfirmed: {}", report.unconfirmed);
    println!("report.created: {}", report.created);
    println!("report.already_exists: {}", report.already_exists);
    println!("report.dry_run: {}", report.dry_run);
}

fn run_preview(config: &BotConfig, item: &str) -> Result<()> {
    let id = item.trim();
    if id.is_empty() {
        bail!("preview requires a non-empty item id");
    }
    let mut repository = repository_client(config)?;
    let settings = FetchSettings {
        language: config.label_language(),
        db_name: config.db_name(),
    };
    let value = match fetch_item(&mut repository, id, &settings)? {
        FetchOutcome::Ready(record) => {
            let prompt = PromptSettings {
                policy: config.generation.prompt_policy,
                custom_instruction: config.generation.custom_instruction.clone(),
            };
            json!({
                "outcome": "ready",
                "title": article_title(&config.run.title_prefix, &record),
                "messages": build_messages(&record, &prompt),
                "record": record,
            })
        }
        FetchOutcome::NotEligible => json!({"outcome": "not_eligible", "item": id}),
        FetchOutcome::Unconfirmed => json!({"outcome": "unconfirmed", "item": id}),
        FetchOutcome::Unsuitable => json!({"outcome": "unsuitable", "item": id}),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn run_status(config: &BotConfig, config_path: &Path) -> Result<()> {
    let checkpoint_path = config.checkpoint_path();
    let checkpoint = ProcessedLog::open(&checkpoint_path)?;

    println!("wbgen status");
    println!("config_path: {}", normalize_path(config_path));
    println!("config_exists: {}", format_flag(config_path.exists()));
    println!(
        "repository.api_url: {}",
        config.repository_api_url().as_deref().unwrap_or("<unset>")
    );
    println!("repository.item_namespace: {}", config.repository.item_namespace);
    println!("repository.label_language: {}", config.label_language());
    println!(
        "wiki.api_url: {}",
        config.wiki_api_url().as_deref().unwrap_or("<unset>")
    );
    println!("wiki.user_agent: {}", config.user_agent());
    println!("wiki.db_name: {}", config.db_name());
    println!("generation.model: {}", config.model());
    println!("generation.temperature: {}", config.temperature());
    println!(
        "generation.prompt_policy: {}",
        config.generation.prompt_policy.as_str()
    );
    println!("run.title_prefix: {}", config.run.title_prefix);
    println!(
        "run.count: {}",
        config
            .run
            .count
            .map(|count| count.to_string())
            .unwrap_or_else(|| "unlimited".to_string())
    );
    println!("run.summary: {}", config.summary_template());
    match Credentials::from_env() {
        Ok(credentials) => println!("credentials: {credentials:?}"),
        Err(_) => println!("credentials: <unset>"),
    }
    for key in ["DEEPSEEK_API_KEY", "OPENROUTER_API_KEY", "CUSTOM_API_KEY"] {
        let present = std::env::var(key).is_ok_and(|value| !value.trim().is_empty());
        println!("env.{key}: {}", if present { "<set>" } else { "<unset>" });
    }
    println!("checkpoint_path: {}", normalize_path(&checkpoint_path));
    println!("checkpoint.processed: {}", checkpoint.len());
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
