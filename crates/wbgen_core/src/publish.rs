use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::checkpoint::CheckpointLog;
use crate::config::BotConfig;
use crate::fetch::{FetchOutcome, FetchSettings, fetch_item};
use crate::generation::ArticleGenerator;
use crate::mediawiki::{PublishOutcome, RepositoryApi, WikiPublishApi};
use crate::prompt::{article_title, assemble_article, edit_summary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub title_prefix: String,
    pub leading_wikitext: String,
    /// Upper bound on items offered to the fetcher; `None` runs the whole stream.
    pub count: Option<usize>,
    pub summary_template: String,
    pub language: String,
    pub db_name: String,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            title_prefix: config.run.title_prefix.clone(),
            leading_wikitext: config.run.leading_wikitext.clone(),
            count: config.run.count,
            summary_template: config.summary_template().to_string(),
            language: config.label_language().to_string(),
            db_name: config.db_name().to_string(),
            dry_run: false,
        }
    }

    fn fetch_settings(&self) -> FetchSettings<'_> {
        FetchSettings {
            language: &self.language,
            db_name: &self.db_name,
        }
    }
}

/// The collaborators one run talks to.
pub struct Services<'a, R, W, G> {
    pub repository: &'a mut R,
    pub wiki: &'a mut W,
    pub generator: &'a mut G,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Unsuitable,
    NotEligible,
    Unconfirmed,
    Created { title: String },
    /// The title was taken between the eligibility check and the write.
    AlreadyExists { title: String },
    DryRun { title: String, content: String },
}

impl ItemOutcome {
    /// Whether the item is finished with and may be checkpointed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unconfirmed | Self::DryRun { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub offered: usize,
    pub already_processed: usize,
    pub unsuitable: usize,
    pub not_eligible: usize,
    pub unconfirmed: usize,
    pub created: usize,
    pub already_exists: usize,
    pub dry_run: usize,
}

impl RunReport {
    fn tally(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Unsuitable => self.unsuitable += 1,
            ItemOutcome::NotEligible => self.not_eligible += 1,
            ItemOutcome::Unconfirmed => self.unconfirmed += 1,
            ItemOutcome::Created { .. } => self.created += 1,
            ItemOutcome::AlreadyExists { .. } => self.already_exists += 1,
            ItemOutcome::DryRun { .. } => self.dry_run += 1,
        }
    }
}

/// Fetches, generates and publishes a single item.
pub fn process_item<R, W, G>(
    services: &mut Services<'_, R, W, G>,
    options: &RunOptions,
    id: &str,
) -> Result<ItemOutcome>
where
    R: RepositoryApi,
    W: WikiPublishApi,
    G: ArticleGenerator,
{
    let record = match fetch_item(services.repository, id, &options.fetch_settings())? {
        FetchOutcome::Ready(record) => record,
        FetchOutcome::NotEligible => return Ok(ItemOutcome::NotEligible),
        FetchOutcome::Unconfirmed => return Ok(ItemOutcome::Unconfirmed),
        FetchOutcome::Unsuitable => return Ok(ItemOutcome::Unsuitable),
    };

    let title = article_title(&options.title_prefix, &record);
    let generated = services.generator.generate(&record)?;
    let content = assemble_article(&options.leading_wikitext, &generated, record.display_label());
    if options.dry_run {
        return Ok(ItemOutcome::DryRun { title, content });
    }

    let summary = edit_summary(&options.summary_template, id);
    match services.wiki.create_page(&title, &content, &summary)? {
        PublishOutcome::Created => Ok(ItemOutcome::Created { title }),
        PublishOutcome::AlreadyExists => Ok(ItemOutcome::AlreadyExists { title }),
    }
}

/// Runs the resumable publish loop over `items`.
///
/// Each identifier is recorded in `checkpoint` right after its terminal
/// outcome is known. Errors stop the loop before the failing identifier is
/// recorded, so a restart retries it.
pub fn run_publish_loop<I, R, W, G, C>(
    items: I,
    services: &mut Services<'_, R, W, G>,
    checkpoint: &mut C,
    options: &RunOptions,
) -> Result<RunReport>
where
    I: IntoIterator<Item = Result<String>>,
    R: RepositoryApi,
    W: WikiPublishApi,
    G: ArticleGenerator,
    C: CheckpointLog,
{
    let mut report = RunReport::default();
    let mut items = items.into_iter();
    loop {
        if options.count.is_some_and(|limit| report.offered >= limit) {
            info!(limit = report.offered, "item count bound reached");
            break;
        }
        let Some(item) = items.next() else {
            break;
        };
        let id = item?;
        if checkpoint.contains(&id) {
            report.already_processed += 1;
            continue;
        }
        report.offered += 1;

        let outcome = process_item(services, options, &id)?;
        match &outcome {
            ItemOutcome::Unsuitable => {
                info!(item = %id, "skipping item without statements");
            }
            ItemOutcome::NotEligible => {}
            ItemOutcome::Unconfirmed => {
                warn!(item = %id, "could not confirm the item has no article; leaving it for a later run");
            }
            ItemOutcome::Created { title } => {
                info!(item = %id, title = %title, "created article");
            }
            ItemOutcome::AlreadyExists { title } => {
                warn!(
                    item = %id,
                    title = %title,
                    "page was created in the meantime; check whether it still needs connecting to the item"
                );
            }
            ItemOutcome::DryRun { title, content } => {
                info!(item = %id, title = %title, "dry run, not publishing:\n{content}");
            }
        }
        if outcome.is_terminal() {
            checkpoint.record(&id)?;
        }
        report.tally(&outcome);
    }
    info!(
        offered = report.offered,
        created = report.created,
        already_processed = report.already_processed,
        "publish loop finished"
    );
    Ok(report)
}
