use std::path::PathBuf;

use crate::args::Args;
use crate::engine::DockerEngine;
use crate::error::Result;
use crate::hub::HubClient;
use crate::reference::SourceRegistry;

/// Endpoints and files resolved from the command line and environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub hub_url: String,
    pub namespace: String,
    pub source_registry: String,
    pub docker_host: String,
    pub criteria_file: PathBuf,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            hub_url: args.hub_url.clone(),
            namespace: args.namespace.to_lowercase(),
            source_registry: args.source_registry.clone(),
            docker_host: args.docker_host.clone(),
            criteria_file: args.criteria_file.clone(),
        }
    }
}

impl Config {
    pub fn hub(&self) -> HubClient {
        HubClient::new(&self.hub_url, &self.namespace)
    }

    pub fn source(&self) -> SourceRegistry {
        SourceRegistry::new(&self.source_registry, &self.namespace)
    }

    /// Fails on a docker host that is neither a unix socket nor a TCP endpoint.
    pub fn engine(&self) -> Result<DockerEngine> {
        DockerEngine::new(&self.docker_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn resolves_defaults() {
        let args = Args::try_parse_from(["hubtags", "list-images", "--hub-url", "https://hub.example.com"]).unwrap();
        let config = Config::from(&args);

        assert_eq!(config.hub_url, "https://hub.example.com");
        assert_eq!(config.namespace, "pingidentity");
        assert_eq!(config.criteria_file, PathBuf::from("tagDeletionCriteria.json"));
        assert_eq!(
            config.source().repository("pingfederate"),
            "registry.hub.docker.com/pingidentity/pingfederate"
        );
    }

    #[test]
    fn docker_host_accepts_unix_sockets() {
        let args = Args::try_parse_from(["hubtags", "list-images", "--docker-host", "unix:///var/run/docker.sock"])
            .unwrap();
        assert!(Config::from(&args).engine().is_ok());

        let args = Args::try_parse_from(["hubtags", "list-images", "--docker-host", "npipe:////./pipe/docker_engine"])
            .unwrap();
        assert!(Config::from(&args).engine().is_err());
    }
}
