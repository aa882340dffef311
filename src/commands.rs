use anyhow::{Context, Result};
use clap::CommandFactory;
use owo_colors::OwoColorize;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::archive::{AbortReason, ArchivePipeline};
use crate::args::{Args, Command, ImageSelection};
use crate::config::Config;
use crate::error::Error;
use crate::filter::{evaluate_all, load_rules, rules_for_images, EvaluatedTag};
use crate::hub::{Credentials, HubClient};
use crate::output::{evaluated_tag_table, tag_table};
use crate::prompt::Confirm;
use crate::reference::TargetRegistry;
use crate::tag::Tag;

pub async fn run<C: Confirm>(command: Command, config: &Config, prompt: &mut C, now: OffsetDateTime) -> Result<()> {
    let hub = config.hub();

    match command {
        Command::Help => {
            Args::command().print_help()?;
            println!();
            Ok(())
        }
        Command::ListImages => {
            let images = resolve_images(&hub, &ImageSelection::All).await?;
            println!("{}", images.join("\n"));
            Ok(())
        }
        Command::ListTags { images } => {
            let images = resolve_images(&hub, &images).await?;
            let tags = collect_tags(&hub, &images).await?;
            println!("{}", tag_table(&tags, now));
            Ok(())
        }
        Command::CleanTags {
            images,
            credentials,
            dry_run,
        } => {
            let images = resolve_images(&hub, &images).await?;
            clean_tags(&hub, config, prompt, &images, credentials.as_ref(), dry_run, now).await
        }
        Command::ArchiveTags { image, target } => archive_tags(&hub, config, prompt, &image, &target, now).await,
    }
}

async fn resolve_images(hub: &HubClient, selection: &ImageSelection) -> Result<Vec<String>> {
    match selection {
        ImageSelection::Named(name) => Ok(vec![name.clone()]),
        ImageSelection::All => {
            info!("Getting image names...");
            Ok(hub.list_images().await?)
        }
    }
}

async fn collect_tags(hub: &HubClient, images: &[String]) -> Result<Vec<Tag>> {
    let mut tags = Vec::new();
    for image in images {
        info!("Getting image tags for {image}...");
        tags.extend(hub.list_tags(image).await?);
    }
    Ok(tags)
}

async fn clean_tags<C: Confirm>(
    hub: &HubClient,
    config: &Config,
    prompt: &mut C,
    images: &[String],
    credentials: Option<&Credentials>,
    dry_run: bool,
    now: OffsetDateTime,
) -> Result<()> {
    let rules = load_rules(&config.criteria_file)?;
    let rules = rules_for_images(rules, images);

    println!("The criteria for tag deletion are:");
    for rule in &rules {
        println!("{}", rule.describe_scope());
    }

    if !prompt.confirm("\nContinue? You will have a chance to review the selected tags before they are deleted.")? {
        println!("Exiting");
        return Ok(());
    }

    let tags = collect_tags(hub, images).await?;
    let flagged: Vec<EvaluatedTag> = evaluate_all(tags, &rules, now.date())
        .into_iter()
        .filter(EvaluatedTag::matched)
        .collect();
    debug!("{} tags matched the deletion criteria", flagged.len());

    if flagged.is_empty() {
        println!("No images found that should be deleted based on the given deletion criteria");
        return Ok(());
    }

    println!("The following tags will be deleted:");
    println!("{}", evaluated_tag_table(&flagged, now));

    if dry_run {
        println!("Exiting since the --dry-run argument was provided. Run again without --dry-run to delete the tags");
        return Ok(());
    }

    if !prompt.confirm("\nAre you sure you want to permanently delete these tags from Docker Hub?")? {
        println!("Exiting");
        return Ok(());
    }

    let credentials = credentials
        .ok_or_else(|| Error::usage("The --username and --password arguments must be provided for the clean-tags operation"))?;

    info!("Deleting tags...");
    let to_delete = flagged.iter().map(|x| x.tag.clone()).collect();
    let report = hub.delete_tags(to_delete, credentials).await;

    let deleted: Vec<EvaluatedTag> = flagged
        .into_iter()
        .filter(|x| report.deleted.contains(&x.tag))
        .collect();
    println!("The following tags were successfully deleted:");
    println!("{}", evaluated_tag_table(&deleted, now));

    if !report.failed.is_empty() {
        println!("❌ The following tags could not be deleted:");
        for (tag, e) in &report.failed {
            println!("{}:{} ({e})", tag.image_name, tag.name);
        }
    }

    Ok(())
}

async fn archive_tags<C: Confirm>(
    hub: &HubClient,
    config: &Config,
    prompt: &mut C,
    image: &str,
    target: &str,
    now: OffsetDateTime,
) -> Result<()> {
    let target = TargetRegistry::parse(target)?;
    let engine = config.engine().context("Unable to set up the local docker engine")?;

    let mut pipeline = ArchivePipeline::new(hub, &engine, prompt, config.source(), target);
    let outcome = pipeline.run(image, now.date()).await?;
    debug!("Archive run ended in stage {:?}", pipeline.stage());

    match outcome.aborted {
        Some(AbortReason::Declined) => println!("Exiting"),
        Some(_) => {}
        None if outcome.success() => {
            println!("{}", format!("All {image} images tagged and pushed to the target registry!").green())
        }
        None => println!(
            "{}",
            format!("❌ One or more {image} image tags could not be pushed to the target registry").red()
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use time::macros::datetime;

    struct Script(Vec<bool>);

    impl Confirm for Script {
        fn confirm(&mut self, _question: &str) -> crate::error::Result<bool> {
            Ok(if self.0.is_empty() { false } else { self.0.remove(0) })
        }
    }

    fn config(url: &str, criteria_file: PathBuf) -> Config {
        Config {
            hub_url: url.to_string(),
            namespace: "pingidentity".into(),
            source_registry: "registry.hub.docker.com".into(),
            docker_host: "tcp://127.0.0.1:9".into(),
            criteria_file,
        }
    }

    fn criteria() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"imageName": "pingfederate", "type": "tag_name", "string": "edge"}},
                {{"imageName": "pingaccess", "type": "tag_name", "string": "latest"}}]"#
        )
        .unwrap();
        file
    }

    async fn tags_mock(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("GET", "/v2/repositories/pingidentity/pingfederate/tags")
            .with_status(200)
            .with_body(
                r#"{"next": null, "results": [
                    {"name": "edge", "last_updated": "2025-06-01T00:00:00.000Z", "images": []},
                    {"name": "2305", "last_updated": "2025-06-01T00:00:00.000Z", "images": []}
                ]}"#,
            )
            .create_async()
            .await
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "alice".into(),
            password: "hunter2".into(),
        }
    }

    #[tokio::test]
    async fn declining_rules_touches_nothing() {
        let mut server = mockito::Server::new_async().await;
        let listing = server.mock("GET", mockito::Matcher::Any).expect(0).create_async().await;

        let file = criteria();
        let config = config(&server.url(), file.path().to_path_buf());
        let command = Command::CleanTags {
            images: ImageSelection::Named("pingfederate".into()),
            credentials: Some(credentials()),
            dry_run: false,
        };

        run(command, &config, &mut Script(vec![false]), datetime!(2025-06-15 00:00 UTC))
            .await
            .unwrap();
        listing.assert_async().await;
    }

    #[tokio::test]
    async fn dry_run_never_deletes() {
        let mut server = mockito::Server::new_async().await;
        let _tags = tags_mock(&mut server).await;
        let login = server.mock("POST", mockito::Matcher::Any).expect(0).create_async().await;
        let delete = server.mock("DELETE", mockito::Matcher::Any).expect(0).create_async().await;

        let file = criteria();
        let config = config(&server.url(), file.path().to_path_buf());
        let command = Command::CleanTags {
            images: ImageSelection::Named("pingfederate".into()),
            credentials: None,
            dry_run: true,
        };

        run(command, &config, &mut Script(vec![true, true]), datetime!(2025-06-15 00:00 UTC))
            .await
            .unwrap();
        login.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn declining_deletion_touches_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _tags = tags_mock(&mut server).await;
        let delete = server.mock("DELETE", mockito::Matcher::Any).expect(0).create_async().await;

        let file = criteria();
        let config = config(&server.url(), file.path().to_path_buf());
        let command = Command::CleanTags {
            images: ImageSelection::Named("pingfederate".into()),
            credentials: Some(credentials()),
            dry_run: false,
        };

        run(command, &config, &mut Script(vec![true, false]), datetime!(2025-06-15 00:00 UTC))
            .await
            .unwrap();
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn deletes_only_matching_tags() {
        let mut server = mockito::Server::new_async().await;
        let _tags = tags_mock(&mut server).await;
        let _login = server
            .mock("POST", "/v2/users/login/")
            .with_status(200)
            .with_body(r#"{"token": "abc"}"#)
            .create_async()
            .await;
        let delete_edge = server
            .mock("DELETE", "/v2/repositories/pingidentity/pingfederate/tags/edge/")
            .with_status(204)
            .create_async()
            .await;
        let delete_other = server
            .mock("DELETE", "/v2/repositories/pingidentity/pingfederate/tags/2305/")
            .expect(0)
            .create_async()
            .await;
        let _logout = server.mock("POST", "/v2/logout/").with_status(200).create_async().await;

        let file = criteria();
        let config = config(&server.url(), file.path().to_path_buf());
        let command = Command::CleanTags {
            images: ImageSelection::Named("pingfederate".into()),
            credentials: Some(credentials()),
            dry_run: false,
        };

        run(command, &config, &mut Script(vec![true, true]), datetime!(2025-06-15 00:00 UTC))
            .await
            .unwrap();
        delete_edge.assert_async().await;
        delete_other.assert_async().await;
    }

    #[tokio::test]
    async fn missing_criteria_file_is_fatal() {
        let server = mockito::Server::new_async().await;
        let config = config(&server.url(), PathBuf::from("/nonexistent/tagDeletionCriteria.json"));
        let command = Command::CleanTags {
            images: ImageSelection::Named("pingfederate".into()),
            credentials: None,
            dry_run: true,
        };

        let err = run(command, &config, &mut Script(vec![true]), datetime!(2025-06-15 00:00 UTC))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Config { .. })));
    }

    #[tokio::test]
    async fn invalid_target_registry_fails_before_pulling() {
        let server = mockito::Server::new_async().await;
        let config = config(&server.url(), PathBuf::from("unused.json"));
        let command = Command::ArchiveTags {
            image: "pingfederate".into(),
            target: "Not A Registry".into(),
        };

        let err = run(command, &config, &mut Script(vec![]), datetime!(2025-06-15 00:00 UTC))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<Error>().is_some());
    }
}
