//! Copy recently updated tags of one image to another registry.
//!
//! A run moves through [Stage]s in order. Only an unreachable engine aborts
//! it with an error; failures of single pulls or pushes are collected and
//! reported in the [ArchiveOutcome].

use std::collections::BTreeMap;
use std::io::Write;

use futures::StreamExt;
use owo_colors::OwoColorize;
use time::Date;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineEvent, ImageEngine, LocalImage};
use crate::error::Result;
use crate::filter::{evaluate_all, FilterRule, ImageScope};
use crate::hub::HubClient;
use crate::output::archive_table;
use crate::prompt::Confirm;
use crate::reference::{SourceRegistry, TargetRegistry};
use crate::tag::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Selecting,
    Pulling,
    Confirming,
    TaggingPushing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    NoTagsFound,
    NothingPulled,
    Declined,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub pushed: Vec<String>,
    pub failed: Vec<String>,
    pub aborted: Option<AbortReason>,
}

impl ArchiveOutcome {
    fn aborted(reason: AbortReason) -> Self {
        Self {
            aborted: Some(reason),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pulled images keyed by short id.
pub type PullResult = BTreeMap<String, LocalImage>;

/// Tags updated more than this long ago are not archived.
pub fn archive_rule() -> FilterRule {
    FilterRule::age_exceeds(ImageScope::All, 0, 2)
}

/// Tags recent enough to archive: those the age rule does not flag.
pub fn select_candidates(tags: Vec<Tag>, today: Date) -> Vec<Tag> {
    evaluate_all(tags, &[archive_rule()], today)
        .into_iter()
        .filter(|x| !x.matched())
        .map(|x| x.tag)
        .collect()
}

/// Tags of pulled images that came from `source`, with the short id of their image.
pub fn source_tags(pulled: &PullResult, source: &SourceRegistry) -> Vec<(String, String)> {
    pulled
        .iter()
        .flat_map(|(short_id, image)| {
            image
                .tags
                .iter()
                .filter(|tag| source.image_and_tag(tag).is_some())
                .map(move |tag| (tag.clone(), short_id.clone()))
        })
        .collect()
}

pub struct ArchivePipeline<'a, E, C> {
    hub: &'a HubClient,
    engine: &'a E,
    prompt: &'a mut C,
    source: SourceRegistry,
    target: TargetRegistry,
    stage: Stage,
}

impl<'a, E: ImageEngine, C: Confirm> ArchivePipeline<'a, E, C> {
    pub fn new(
        hub: &'a HubClient,
        engine: &'a E,
        prompt: &'a mut C,
        source: SourceRegistry,
        target: TargetRegistry,
    ) -> Self {
        Self {
            hub,
            engine,
            prompt,
            source,
            target,
            stage: Stage::Selecting,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Archive stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    pub async fn run(&mut self, image_name: &str, today: Date) -> Result<ArchiveOutcome> {
        info!("Determining which tags to pull for image {image_name}...");
        let tags = self.hub.list_tags(image_name).await?;
        if tags.is_empty() {
            println!("No tags found for {image_name}");
            self.enter(Stage::Done);
            return Ok(ArchiveOutcome::aborted(AbortReason::NoTagsFound));
        }
        let candidates = select_candidates(tags, today);
        debug!("{} tags updated since {}", candidates.len(), today);

        self.enter(Stage::Pulling);
        info!("Pulling tags for image {image_name}. This may take a while...");
        let pulled = self.pull(&candidates).await?;

        self.enter(Stage::Confirming);
        let rows = source_tags(&pulled, &self.source);
        if rows.is_empty() {
            println!("No tags found that need to be archived for {image_name}");
            self.enter(Stage::Done);
            return Ok(ArchiveOutcome::aborted(AbortReason::NothingPulled));
        }
        println!("{}", archive_table(&rows));
        let question = format!(
            "The above images will be pushed to the target registry {}. Continue?",
            self.target
        );
        if !self.prompt.confirm(&question)? {
            self.enter(Stage::Done);
            return Ok(ArchiveOutcome::aborted(AbortReason::Declined));
        }

        self.enter(Stage::TaggingPushing);
        info!("Pull completed. Tagging for the target registry...");
        let outcome = self.tag_and_push(&pulled).await;

        self.enter(Stage::Done);
        Ok(outcome)
    }

    /// Pull every candidate. The engine must answer a ping before anything is pulled.
    async fn pull(&self, candidates: &[Tag]) -> Result<PullResult> {
        self.engine.ping().await?;

        let mut pulled = PullResult::new();
        for tag in candidates {
            info!("Pulling tag {} for image {}", tag.name, tag.image_name);
            let repository = self.source.repository(&tag.image_name);
            match self.engine.pull(&repository, &tag.name).await {
                Ok(image) => {
                    pulled.insert(image.short_id(), image);
                }
                Err(e) => warn!("Skipping {repository}:{}: {e}", tag.name),
            }
        }
        Ok(pulled)
    }

    async fn tag_and_push(&self, pulled: &PullResult) -> ArchiveOutcome {
        let mut outcome = ArchiveOutcome::default();

        for (short_id, image) in pulled {
            if image.tags.is_empty() {
                continue;
            }

            let mut pushed = Vec::new();
            let mut failed = Vec::new();
            for local_tag in &image.tags {
                // Tags left over from earlier archive runs point at the target already
                let Some((image_name, tag)) = self.source.image_and_tag(local_tag) else {
                    continue;
                };

                println!("Starting push for tag {local_tag}");
                if self.push_one(image, &image_name, &tag).await {
                    pushed.push(local_tag.clone());
                } else {
                    failed.push(local_tag.clone());
                }
            }

            println!();
            if !pushed.is_empty() {
                println!(
                    "The following tags for image {short_id} have been pushed to registry {}:",
                    self.target
                );
                println!("{}", pushed.join("\n"));
            }
            if !failed.is_empty() {
                println!(
                    "❌ The following tags for image {short_id} could not be pushed to registry {} due to an error:",
                    self.target
                );
                println!("{}", failed.join("\n"));
            }
            if pushed.is_empty() && failed.is_empty() {
                println!("No tags pushed for image {short_id}");
            }
            println!();

            outcome.pushed.extend(pushed);
            outcome.failed.extend(failed);
        }

        outcome
    }

    /// Tag the image for the target registry and push it. `true` if no error was seen.
    async fn push_one(&self, image: &LocalImage, image_name: &str, tag: &str) -> bool {
        let target = match self.target.retarget(image_name, tag) {
            Ok(target) => target,
            Err(e) => {
                error!("{e}");
                return false;
            }
        };

        if let Err(e) = self.engine.tag(&image.id, &target.repository, &target.tag).await {
            error!("{e}");
            return false;
        }

        let mut events = match self.engine.push(&target.repository, &target.tag).await {
            Ok(events) => events,
            Err(e) => {
                error!("{e}");
                return false;
            }
        };

        let mut progress = ProgressLine::default();
        let mut ok = true;
        while let Some(event) = events.next().await {
            match event {
                Ok(EngineEvent::Status { status, id, progress: bar }) => match status.as_str() {
                    "Pushing" => progress.show(bar.as_deref().unwrap_or_default()),
                    "Pushed" | "Layer already exists" => {
                        progress.clear();
                        println!("{status}. id: {}", id.unwrap_or_default());
                    }
                    _ => debug!("{status}"),
                },
                Ok(EngineEvent::Error(message)) => {
                    progress.clear();
                    println!("{}", format!("Error: {message}").red());
                    ok = false;
                }
                Err(e) => {
                    progress.clear();
                    println!("{}", format!("Error: {e}").red());
                    ok = false;
                }
            }
        }
        progress.clear();
        ok
    }
}

/// A single terminal line that is overwritten in place.
#[derive(Default)]
struct ProgressLine {
    width: usize,
}

impl ProgressLine {
    fn show(&mut self, text: &str) {
        self.clear();
        print!("{text}\r");
        let _ = std::io::stdout().flush();
        self.width = text.chars().count();
    }

    fn clear(&mut self) {
        if self.width > 0 {
            print!("{}\r", " ".repeat(self.width));
            let _ = std::io::stdout().flush();
            self.width = 0;
        }
    }
}
