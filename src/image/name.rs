use crate::{errors::ImageError, image::ContentDigest};
use regex::Regex;
use std::{fmt, str::FromStr};

/// The registry used when a name does not specify one
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Parsed Docker-style image name
///
/// An owned representation of a docker "reference", naming an image that can
/// be fetched from a registry server, optionally at a specific version. This
/// tries to be format-compatible with Docker including its quirks.
///
/// A complete name contains a registry, repository, tag, and
/// [ContentDigest] in that order; only the repository is mandatory. The tag
/// always begins with a `:` and the digest with an `@`, but delineating the
/// optional registry from the first section of the repository requires
/// heuristics: the first path section is taken as a registry if it contains
/// a dot or a port, or if it is the literal `localhost`.
///
/// When a [ContentDigest] is specified, it securely identifies the specific
/// contents of an image's manifest. Remember that a name without a digest is
/// only as trustworthy as the registry server and our connection to it.
#[derive(Clone, Eq, PartialEq)]
pub struct ImageName {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<ContentDigest>,
}

impl ImageName {
    /// Parse a [prim@str] as an [ImageName]
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref REGISTRY: Regex = Regex::new(concat!(
                "^",
                "[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?",          // first domain component
                "(?:\\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*",  // additional components
                "(?::[0-9]+)?",                                      // optional port
                "$",
            ))
            .unwrap();
            static ref REPOSITORY: Regex = Regex::new(concat!(
                "^",
                "[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*",             // first path segment
                "(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*",       // additional segments
                "$",
            ))
            .unwrap();
            static ref TAG: Regex = Regex::new("^[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,127}$").unwrap();
        }

        // Split off the digest first; '@' cannot appear in other components
        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => (rest, Some(ContentDigest::parse(digest)?)),
            None => (s, None),
        };

        // The first path section is a registry if it looks like a host
        let (registry, path) = match rest.split_once('/') {
            Some((head, tail))
                if head.contains('.') || head.contains(':') || head == "localhost" =>
            {
                (Some(head), tail)
            }
            _ => (None, rest),
        };

        // A tag colon must come after the last path slash
        let (repository, tag) = match path.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => (repository, Some(tag)),
            _ => (path, None),
        };

        if let Some(registry) = registry {
            if !REGISTRY.is_match(registry) {
                return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
            }
        }
        if !REPOSITORY.is_match(repository) {
            return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
        }
        if let Some(tag) = tag {
            if !TAG.is_match(tag) {
                return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
            }
        }

        Ok(ImageName {
            registry: registry.map(str::to_owned),
            repository: repository.to_owned(),
            tag: tag.map(str::to_owned),
            digest,
        })
    }

    /// Returns a reference to the optional registry portion of the name
    pub fn registry_str(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// Returns a reference to the repository portion of the name
    pub fn repository_str(&self) -> &str {
        &self.repository
    }

    /// Returns a reference to the optional tag portion of the name
    pub fn tag_str(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns the optional digest portion of the name
    pub fn content_digest(&self) -> Option<&ContentDigest> {
        self.digest.as_ref()
    }

    /// The most specific version available: digest, then tag, then `latest`
    pub fn version_str(&self) -> &str {
        if let Some(digest) = &self.digest {
            digest.as_str()
        } else if let Some(tag) = &self.tag {
            tag.as_str()
        } else {
            "latest"
        }
    }

    /// Resolve the network host and complete repository path for this name
    ///
    /// Names without a registry, and names using the `docker.io` alias, go
    /// to [DEFAULT_REGISTRY], which requires the `library/` prefix on
    /// single-segment repository paths.
    pub fn resolve_endpoint(&self) -> (String, String) {
        match self.registry.as_deref() {
            Some(registry) if registry != "docker.io" => {
                (registry.to_owned(), self.repository.clone())
            }
            _ => {
                let repository = if self.repository.contains('/') {
                    self.repository.clone()
                } else {
                    format!("library/{}", self.repository)
                };
                (DEFAULT_REGISTRY.to_owned(), repository)
            }
        }
    }
}

impl FromStr for ImageName {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
