//! Output module tree
//!
//! A resolution run produces one tree of modules, each pairing an artifact
//! with its verified descriptor. The tree is handed to the distribution
//! manifest writer and nothing in the resolver keeps a reference to it
//! afterwards.

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use talaria::MavenSpecifier;

use crate::infrastructure::error::Error;

/// Role of a module within the tree
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleType {
    /// The loader itself; always the root of the tree
    LoaderRoot,
    /// The persisted version manifest
    VersionManifest,
    /// A plain library dependency
    Library,
}

/// Self-contained artifact descriptor. The hash is always computed from
/// bytes just read from disk or trusted from a prior verified write.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMeta {
    pub size: u64,
    pub sha1: String,
    /// Hash of the decompressed form, present only for libraries that were
    /// staged compressed and unpacked afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decompressed_sha1: Option<String>,
    pub url: String,
}

impl ArtifactMeta {
    /// Builds a descriptor from in-memory bytes
    pub async fn from_bytes(
        bytes: Bytes,
        url: String,
    ) -> Result<ArtifactMeta, Error> {
        let size = bytes.len() as u64;
        let sha1 = talaria::get_hash(bytes).await?;

        Ok(ArtifactMeta {
            size,
            sha1,
            decompressed_sha1: None,
            url,
        })
    }

    /// Builds a descriptor from a file on disk, taking the size from
    /// filesystem metadata
    pub async fn from_file(
        path: &Path,
        url: String,
    ) -> Result<ArtifactMeta, Error> {
        let size = std::fs::metadata(path)?.len();
        let bytes = Bytes::from(std::fs::read(path)?);
        let sha1 = talaria::get_hash(bytes).await?;

        Ok(ArtifactMeta {
            size,
            sha1,
            decompressed_sha1: None,
            url,
        })
    }
}

fn default_classpath() -> bool {
    true
}

fn classpath_is_default(value: &bool) -> bool {
    *value
}

/// One node of the output tree
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Coordinate-derived identifier
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub artifact: ArtifactMeta,
    /// Whether the artifact joins the runtime classpath
    #[serde(
        default = "default_classpath",
        skip_serializing_if = "classpath_is_default"
    )]
    pub classpath: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_modules: Vec<Module>,
}

impl Module {
    pub fn new(
        spec: &MavenSpecifier,
        name: impl Into<String>,
        module_type: ModuleType,
        artifact: ArtifactMeta,
    ) -> Module {
        Module {
            id: spec.to_string(),
            name: name.into(),
            module_type,
            artifact,
            classpath: true,
            sub_modules: Vec::new(),
        }
    }

    /// Builds a version-manifest module; manifests never join the classpath
    pub fn manifest(
        id: impl Into<String>,
        name: impl Into<String>,
        artifact: ArtifactMeta,
    ) -> Module {
        Module {
            id: id.into(),
            name: name.into(),
            module_type: ModuleType::VersionManifest,
            artifact,
            classpath: false,
            sub_modules: Vec::new(),
        }
    }
}
