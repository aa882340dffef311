//! Moving image references from the source registry to the archive registry.
//!
//! References are parsed with the distribution grammar rather than split on
//! `:`, so registry hosts carrying a port (`localhost:5000/archive`) are read
//! as host and path instead of being mistaken for a tag separator.

use std::fmt;
use std::str::FromStr;

use oci_spec::distribution::Reference;

use crate::error::{Error, Result};

fn parse(reference: &str) -> Result<Reference> {
    Reference::from_str(reference).map_err(|e| Error::Reference {
        reference: reference.to_string(),
        message: e.to_string(),
    })
}

/// A `repository:tag` pair, split for the engine's tag and push calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host and repository path, without the tag
    pub repository: String,
    pub tag: String,
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// The registry and namespace the managed images are pulled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRegistry {
    host: String,
    namespace: String,
}

impl SourceRegistry {
    pub fn new(host: &str, namespace: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            namespace: namespace.trim_matches('/').to_string(),
        }
    }

    /// Repository to pull `image_name` from, e.g. `registry.hub.docker.com/pingidentity/pingfederate`.
    pub fn repository(&self, image_name: &str) -> String {
        format!("{}/{}/{image_name}", self.host, self.namespace)
    }

    /// Split a local tag pulled from this registry into image name and tag.
    ///
    /// Tags from any other registry or namespace yield `None`.
    pub fn image_and_tag(&self, local_tag: &str) -> Option<(String, String)> {
        let reference = parse(local_tag).ok()?;
        if !reference.registry().eq_ignore_ascii_case(&self.host) {
            return None;
        }

        let image = reference
            .repository()
            .strip_prefix(&self.namespace)?
            .strip_prefix('/')?
            .to_string();
        let tag = reference.tag()?.to_string();
        Some((image, tag))
    }
}

/// Where archived tags are pushed: a registry host with an optional path, e.g. `localhost:5000/archive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRegistry(String);

impl TargetRegistry {
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim().trim_end_matches('/');
        if target.is_empty() {
            return Err(Error::usage("The --target-registry argument must not be empty"));
        }
        // Validate with a placeholder image so bad hosts surface before anything is pulled
        parse(&format!("{target}/image:tag"))?;
        Ok(Self(target.to_string()))
    }

    pub fn retarget(&self, image_name: &str, tag: &str) -> Result<ImageRef> {
        let reference = parse(&format!("{}/{image_name}:{tag}", self.0))?;
        let tag = reference.tag().unwrap_or(tag).to_string();

        Ok(ImageRef {
            repository: format!("{}/{}", reference.registry(), reference.repository()),
            tag,
        })
    }
}

impl fmt::Display for TargetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
