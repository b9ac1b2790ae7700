//! # Talaria
//!
//! Talaria is a library which provides models and methods for resolving and
//! staging the artifacts of Minecraft mod loaders

#![warn(missing_docs, unused_import_braces, missing_debug_implementations)]

use std::{cmp::Ordering, convert::TryFrom, fmt::Display, str::FromStr};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Models and methods for parsing and comparing game versions
pub mod version;

/// Your branding, used for the user agent and similar
#[derive(Debug)]
pub struct Branding {
    /// The name of your application
    pub header_value: String,
}

/// The branding of your application
pub static BRANDING: OnceCell<Branding> = OnceCell::new();

impl Branding {
    /// Creates a new branding instance
    pub fn new(name: String, email: String) -> Branding {
        let header_value = format!(
            "{}/talaria/{} <{}>",
            name,
            env!("CARGO_PKG_VERSION"),
            email
        );

        Branding { header_value }
    }

    /// Returns the branding instance
    pub fn set_branding(branding: Branding) -> Result<(), Error> {
        BRANDING
            .set(branding)
            .map_err(|_| Error::BrandingAlreadySet)
    }
}

impl Default for Branding {
    fn default() -> Self {
        Branding::new("unbranded".to_string(), "unbranded".to_string())
    }
}

#[derive(thiserror::Error, Debug)]
/// An error type representing possible errors when fetching artifacts
pub enum Error {
    #[error("Failed to validate file checksum at url {url} with hash {hash} after {tries} tries")]
    /// A checksum was failed to validate for a file
    ChecksumFailure {
        /// The checksum's hash
        hash: String,
        /// The URL of the file attempted to be downloaded
        url: String,
        /// The amount of tries that the file was downloaded until failure
        tries: u32,
    },
    /// There was an error while deserializing metadata
    #[error("Error while deserializing JSON")]
    SerdeError(#[from] serde_json::Error),
    /// There was a network error when fetching an object
    #[error("Unable to fetch {item}")]
    FetchError {
        /// The internal reqwest error
        inner: reqwest::Error,
        /// The item that was failed to be fetched
        item: String,
    },
    /// There was an error when managing async tasks
    #[error("Error while managing asynchronous tasks")]
    TaskError(#[from] tokio::task::JoinError),
    /// Error while parsing input
    #[error("{0}")]
    ParseError(String),
    /// The branding has already been set
    #[error("Branding already set")]
    BrandingAlreadySet,
}

/// A maven coordinate identifying one physical artifact
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Default)]
pub struct MavenSpecifier {
    /// The group of the artifact
    pub group: String,
    /// Artifact name
    pub artifact: String,
    /// Version of the artifact
    pub version: String,
    /// Classifier of the artifact
    pub classifier: Option<String>,
    /// File extension
    pub extension: String,
}

impl MavenSpecifier {
    /// Returns the filename of the artifact
    pub fn filename(&self) -> String {
        if let Some(classifier) = &self.classifier {
            format!(
                "{}-{}-{}.{}",
                self.artifact, self.version, classifier, self.extension
            )
        } else {
            format!("{}-{}.{}", self.artifact, self.version, self.extension)
        }
    }

    /// Returns the base path of the artifact
    pub fn base(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group.replace('.', "/"),
            self.artifact,
            self.version
        )
    }

    /// Returns the full path of the artifact
    pub fn path(&self) -> String {
        format!("{}/{}", self.base(), self.filename())
    }

    /// Returns whether the version still carries an unresolved placeholder
    /// token (e.g. `${LOADER_VERSION}`)
    pub fn has_placeholder(&self) -> bool {
        self.version.contains("${")
    }

    /// Returns a copy of the specifier with the version replaced
    pub fn with_version(&self, version: &str) -> MavenSpecifier {
        MavenSpecifier {
            version: version.to_string(),
            ..self.clone()
        }
    }

    /// Returns a copy of the specifier with the classifier replaced
    pub fn with_classifier(
        &self,
        classifier: Option<&str>,
    ) -> MavenSpecifier {
        MavenSpecifier {
            classifier: classifier.map(|x| x.to_string()),
            ..self.clone()
        }
    }

    /// Returns a copy of the specifier with the extension replaced
    pub fn with_extension(&self, extension: &str) -> MavenSpecifier {
        MavenSpecifier {
            extension: extension.to_string(),
            ..self.clone()
        }
    }
}

impl FromStr for MavenSpecifier {
    type Err = Error;

    fn from_str(specifier: &str) -> Result<Self, Self::Err> {
        let at_split = specifier.split('@').collect::<Vec<&str>>();

        let name_items = at_split
            .first()
            .ok_or_else(|| {
                Error::ParseError(format!(
                    "Invalid maven specifier for artifact {}",
                    &specifier
                ))
            })?
            .split(':')
            .collect::<Vec<&str>>();

        let group = name_items
            .first()
            .ok_or_else(|| {
                Error::ParseError(format!(
                    "Unable to find group for artifact {}",
                    &specifier
                ))
            })?
            .to_string();
        let artifact = name_items
            .get(1)
            .ok_or_else(|| {
                Error::ParseError(format!(
                    "Unable to find name for artifact {}",
                    &specifier
                ))
            })?
            .to_string();
        let version = name_items
            .get(2)
            .ok_or_else(|| {
                Error::ParseError(format!(
                    "Unable to find version for artifact {}",
                    &specifier
                ))
            })?
            .to_string();

        let extension = if at_split.len() == 2 {
            at_split[1].to_string()
        } else {
            "jar".to_string()
        };

        let classifier = if name_items.len() == 4 {
            Some(
                name_items
                    .get(3)
                    .ok_or_else(|| {
                        Error::ParseError(format!(
                            "Unable to find classifier for artifact {}",
                            &specifier
                        ))
                    })?
                    .to_string(),
            )
        } else {
            None
        };
        Ok(MavenSpecifier {
            group,
            artifact,
            version,
            classifier,
            extension,
        })
    }
}

impl TryFrom<&str> for MavenSpecifier {
    type Error = Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for MavenSpecifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let extension = if self.extension != "jar" {
            format!("@{}", self.extension)
        } else {
            String::new()
        };

        if let Some(classifier) = self.classifier.as_ref() {
            write!(
                f,
                "{}:{}:{}:{}{}",
                self.group, self.artifact, self.version, classifier, extension
            )
        } else {
            write!(
                f,
                "{}:{}:{}{}",
                self.group, self.artifact, self.version, extension
            )
        }
    }
}

impl Serialize for MavenSpecifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MavenSpecifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Converts a maven artifact to a path
pub fn get_path_from_artifact(artifact: &str) -> Result<String, Error> {
    let specifier: MavenSpecifier = artifact.parse()?;

    Ok(specifier.path())
}

/// Compares two loader build strings segment by segment. Loader builds are
/// dotted numeric sequences (`14.23.5.2859`) that are not valid semver, so
/// they get their own comparator. Missing or non-numeric segments compare
/// as zero.
pub fn compare_loader_builds(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| {
        s.split('.')
            .map(|x| x.parse::<u32>().unwrap_or(0))
            .collect::<Vec<u32>>()
    };

    let left = parse(a);
    let right = parse(b);
    let len = left.len().max(right.len());

    for i in 0..len {
        let x = left.get(i).copied().unwrap_or(0);
        let y = right.get(i).copied().unwrap_or(0);

        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

/// Downloads a file with retry and checksum functionality
pub async fn download_file(
    url: &str,
    sha1: Option<&str>,
) -> Result<bytes::Bytes, Error> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(header) = reqwest::header::HeaderValue::from_str(
        &BRANDING.get_or_init(Branding::default).header_value,
    ) {
        headers.insert(reqwest::header::USER_AGENT, header);
    }
    let client = reqwest::Client::builder()
        .tcp_keepalive(Some(std::time::Duration::from_secs(10)))
        .timeout(std::time::Duration::from_secs(15))
        .default_headers(headers)
        .build()
        .map_err(|err| Error::FetchError {
            inner: err,
            item: url.to_string(),
        })?;

    for attempt in 1..=4 {
        let result = client.get(url).send().await;

        match result {
            Ok(x) => {
                let bytes = x.bytes().await;

                if let Ok(bytes) = bytes {
                    if let Some(sha1) = sha1 {
                        if &*get_hash(bytes.clone()).await? != sha1 {
                            if attempt <= 3 {
                                continue;
                            } else {
                                return Err(Error::ChecksumFailure {
                                    hash: sha1.to_string(),
                                    url: url.to_string(),
                                    tries: attempt,
                                });
                            }
                        }
                    }

                    return Ok(bytes);
                } else if attempt <= 3 {
                    continue;
                } else if let Err(err) = bytes {
                    return Err(Error::FetchError {
                        inner: err,
                        item: url.to_string(),
                    });
                }
            }
            Err(_) if attempt <= 3 => continue,
            Err(err) => {
                return Err(Error::FetchError {
                    inner: err,
                    item: url.to_string(),
                })
            }
        }
    }

    unreachable!()
}

/// Checks whether a remote file exists without downloading it
pub async fn remote_file_exists(url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client.head(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Computes a checksum of the input bytes
pub async fn get_hash(bytes: bytes::Bytes) -> Result<String, Error> {
    let hash =
        tokio::task::spawn_blocking(|| sha1::Sha1::from(bytes).hexdigest())
            .await?;

    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_specifier() {
        let spec: MavenSpecifier =
            "net.minecraftforge:forge:1.20.4-49.0.3".parse().unwrap();

        assert_eq!(spec.group, "net.minecraftforge");
        assert_eq!(spec.artifact, "forge");
        assert_eq!(spec.version, "1.20.4-49.0.3");
        assert_eq!(spec.classifier, None);
        assert_eq!(spec.extension, "jar");
        assert_eq!(
            spec.path(),
            "net/minecraftforge/forge/1.20.4-49.0.3/forge-1.20.4-49.0.3.jar"
        );
    }

    #[test]
    fn parse_classifier_and_extension() {
        let spec: MavenSpecifier =
            "net.minecraftforge:forge:1.12.2-14.23.5.2859:universal@jar"
                .parse()
                .unwrap();

        assert_eq!(spec.classifier.as_deref(), Some("universal"));
        assert_eq!(
            spec.filename(),
            "forge-1.12.2-14.23.5.2859-universal.jar"
        );

        let spec: MavenSpecifier =
            "org.scala-lang:scala-library:2.11.1@pack.xz".parse().unwrap();
        assert_eq!(spec.extension, "pack.xz");
        assert_eq!(
            spec.to_string(),
            "org.scala-lang:scala-library:2.11.1@pack.xz"
        );
    }

    #[test]
    fn display_round_trips() {
        for input in [
            "net.minecraftforge:forge:1.20.4-49.0.3",
            "net.minecraftforge:forge:1.12.2-14.23.5.2859:universal",
            "org.scala-lang:scala-library:2.11.1@pack.xz",
        ] {
            let spec: MavenSpecifier = input.parse().unwrap();
            assert_eq!(spec.to_string(), input);
        }
    }

    #[test]
    fn placeholder_resolution() {
        let template: MavenSpecifier =
            "net.minecraftforge:forge:${LOADER_VERSION}".parse().unwrap();
        assert!(template.has_placeholder());

        let resolved = template.with_version("1.20.4-49.0.3");
        assert!(!resolved.has_placeholder());
        assert_eq!(resolved.version, "1.20.4-49.0.3");
        // the template itself is untouched
        assert!(template.has_placeholder());
    }

    #[test]
    fn loader_build_comparison() {
        assert_eq!(
            compare_loader_builds("14.23.5.2851", "14.23.5.2859"),
            Ordering::Less
        );
        assert_eq!(
            compare_loader_builds("38.0.17", "38.0.17"),
            Ordering::Equal
        );
        assert_eq!(
            compare_loader_builds("48.0.1", "47.9.99"),
            Ordering::Greater
        );
        // shorter sequences compare with implicit zeros
        assert_eq!(
            compare_loader_builds("14.23.5", "14.23.5.2851"),
            Ordering::Less
        );
    }
}
