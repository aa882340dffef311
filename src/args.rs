use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};
use crate::hub::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Print this usage information
    Help,
    /// List all images in the namespace
    ListImages,
    /// List the tags of --image-name
    ListTags,
    /// Delete the tags of --image-name matching the tag deletion criteria
    CleanTags,
    /// Copy tags of --image-name updated in the last two months to --target-registry
    ArchiveTags,
}

#[derive(Debug, Parser, Clone)]
#[clap(
    name = "hubtags",
    version,
    about = "Manage the tags of the images of a Docker Hub namespace",
    after_help = "EXAMPLES:
    List all available images in the namespace
        hubtags list-images

    List all available tags for pingidentity/pingdirectory
        hubtags list-tags --image-name pingdirectory

    Delete any outdated tags for pingdirectory
        hubtags clean-tags --image-name pingdirectory --username user --password password"
)]
pub struct Args {
    #[clap(value_enum, ignore_case = true, default_value = "help")]
    pub operation: Operation,
    /// Image name within the namespace. "all" selects every image, except for archive-tags
    #[clap(long)]
    pub image_name: Option<String>,
    /// Docker Hub username. Needed to run clean-tags
    #[clap(long)]
    pub username: Option<String>,
    /// Docker Hub password. Needed to run clean-tags
    #[clap(long)]
    pub password: Option<String>,
    /// Registry tags are copied to by archive-tags
    #[clap(long)]
    pub target_registry: Option<String>,
    /// Skip deleting the tags selected by clean-tags
    #[clap(long)]
    pub dry_run: bool,
    /// JSON file with the tag deletion criteria
    #[clap(long, default_value = "tagDeletionCriteria.json")]
    pub criteria_file: PathBuf,
    #[clap(long, default_value = "pingidentity")]
    pub namespace: String,
    #[clap(long, env = "HUB_URL", default_value = "https://hub.docker.com")]
    pub hub_url: String,
    /// Registry host images are pulled from by archive-tags
    #[clap(long, default_value = "registry.hub.docker.com")]
    pub source_registry: String,
    /// Docker engine endpoint, unix:// socket or tcp://host:port
    #[clap(long, env = "DOCKER_HOST", default_value = "unix:///var/run/docker.sock")]
    pub docker_host: String,
    #[clap(long)]
    pub debug: bool,
    #[clap(long)]
    pub trace: bool,
}

/// Which images an operation runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSelection {
    All,
    Named(String),
}

impl ImageSelection {
    fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Named(name.to_string())
        }
    }
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    ListImages,
    ListTags {
        images: ImageSelection,
    },
    CleanTags {
        images: ImageSelection,
        credentials: Option<Credentials>,
        dry_run: bool,
    },
    ArchiveTags {
        image: String,
        target: String,
    },
}

impl Args {
    pub fn validate(&self) -> Result<Command> {
        let operation = self.operation;
        let name = operation
            .to_possible_value()
            .map(|x| x.get_name().to_string())
            .unwrap_or_default();

        if operation == Operation::CleanTags
            && !self.dry_run
            && (self.username.is_none() || self.password.is_none())
        {
            return Err(Error::usage(
                "The --username and --password arguments must be provided for the clean-tags operation",
            ));
        }

        let needs_image = matches!(
            operation,
            Operation::ListTags | Operation::CleanTags | Operation::ArchiveTags
        );
        let image = match (&self.image_name, needs_image) {
            (Some(image), _) => Some(image.clone()),
            (None, false) => None,
            (None, true) => {
                let mut message = format!("The --image-name argument must be provided for the {name} operation");
                if operation != Operation::ArchiveTags {
                    message.push_str("\nUse '--image-name all' to refer to all images in the namespace");
                }
                return Err(Error::usage(message));
            }
        };

        let credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Ok(match operation {
            Operation::Help => Command::Help,
            Operation::ListImages => Command::ListImages,
            Operation::ListTags => Command::ListTags {
                images: ImageSelection::parse(&image.unwrap_or_default()),
            },
            Operation::CleanTags => Command::CleanTags {
                images: ImageSelection::parse(&image.unwrap_or_default()),
                credentials,
                dry_run: self.dry_run,
            },
            Operation::ArchiveTags => {
                let image = image.unwrap_or_default();
                let target = self.target_registry.clone().ok_or_else(|| {
                    Error::usage(format!("The --target-registry argument must be provided for the {name} operation"))
                })?;
                if ImageSelection::parse(&image) == ImageSelection::All {
                    return Err(Error::usage("The archive-tags operation runs on a single image, not 'all'"));
                }
                Command::ArchiveTags { image, target }
            }
        })
    }
}
