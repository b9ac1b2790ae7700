//! Loader version-manifest data model
//!
//! Both strategy families hand back the same conventional document: the
//! `version.json` a loader installer generates, or the copy embedded in a
//! legacy loader jar. Parsed once per run and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use talaria::MavenSpecifier;

/// A loader version manifest
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoaderManifest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,
    /// Legacy space-separated argument string (pre-1.13 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<ManifestArguments>,
    #[serde(default)]
    pub libraries: Vec<ManifestLibrary>,
}

/// Structured argument lists (1.13+ format)
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ManifestArguments {
    #[serde(default)]
    pub game: Vec<serde_json::Value>,
    #[serde(default)]
    pub jvm: Vec<serde_json::Value>,
}

/// One library record in a manifest
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ManifestLibrary {
    pub name: MavenSpecifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<LibraryDownloads>,
    /// Plain repository base URL (legacy records)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Legacy checksum list; reliable only when it has exactly one entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksums: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LibraryDownloads {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<DownloadEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DownloadEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub sha1: String,
    pub size: u64,
    pub url: String,
}

impl LoaderManifest {
    pub fn parse(bytes: &[u8]) -> Result<LoaderManifest, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Scans the game argument list for a flag and returns the value that
    /// follows it. Falls back to the legacy space-separated argument
    /// string when the structured list is absent.
    pub fn game_argument_value(&self, flag: &str) -> Option<&str> {
        if let Some(arguments) = &self.arguments {
            let mut args = arguments.game.iter().filter_map(|x| x.as_str());
            while let Some(arg) = args.next() {
                if arg == flag {
                    return args.next();
                }
            }
        }

        if let Some(legacy) = &self.minecraft_arguments {
            let mut args = legacy.split(' ');
            while let Some(arg) = args.next() {
                if arg == flag {
                    return args.next();
                }
            }
        }

        None
    }

    /// Finds the manifest's record for the loader's own artifact
    pub fn self_library(
        &self,
        group: &str,
        artifact: &str,
    ) -> Option<&ManifestLibrary> {
        self.libraries
            .iter()
            .find(|lib| lib.name.group == group && lib.name.artifact == artifact)
    }
}

impl ManifestLibrary {
    /// Returns the declared checksum when exactly one is present. Legacy
    /// records may declare several (or none), which the integrity rules
    /// treat as unverifiable.
    pub fn single_checksum(&self) -> Option<&str> {
        match &self.checksums {
            Some(sums) if sums.len() == 1 => Some(sums[0].as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODERN: &str = r#"{
        "id": "1.20.4-forge-49.0.3",
        "inheritsFrom": "1.20.4",
        "mainClass": "cpw.mods.bootstraplauncher.BootstrapLauncher",
        "arguments": {
            "game": ["--launchTarget", "forge_client", "--fml.forgeVersion", "49.0.3", "--fml.mcVersion", "1.20.4"]
        },
        "libraries": [
            {
                "name": "net.minecraftforge:fmlloader:1.20.4-49.0.3",
                "downloads": {
                    "artifact": {
                        "path": "net/minecraftforge/fmlloader/1.20.4-49.0.3/fmlloader-1.20.4-49.0.3.jar",
                        "sha1": "21f1d0e3efb6bbc97ae7fea4e6a3b51a2a3be461",
                        "size": 1024,
                        "url": "https://maven.minecraftforge.net/net/minecraftforge/fmlloader/1.20.4-49.0.3/fmlloader-1.20.4-49.0.3.jar"
                    }
                }
            }
        ]
    }"#;

    const LEGACY: &str = r#"{
        "id": "1.12.2-forge-14.23.5.2859",
        "minecraftArguments": "--tweakClass net.minecraftforge.fml.common.launcher.FMLTweaker",
        "libraries": [
            {
                "name": "net.minecraftforge:forge:1.12.2-14.23.5.2859",
                "url": "https://maven.minecraftforge.net/",
                "checksums": ["e57430e1e0bf78c52530e5b057ad4bf0f1e0ffbd"]
            },
            {
                "name": "org.scala-lang:scala-library:2.11.1",
                "url": "https://maven.minecraftforge.net/",
                "checksums": ["0e5d54e255c1d4e2578ddb28891a81ad81149cd3", "4a7f2491e658347ea9e6dd2ff916f4755ed2b533"]
            }
        ]
    }"#;

    #[test]
    fn parse_modern_manifest() {
        let manifest = LoaderManifest::parse(MODERN.as_bytes()).unwrap();

        assert_eq!(manifest.id, "1.20.4-forge-49.0.3");
        assert_eq!(manifest.inherits_from.as_deref(), Some("1.20.4"));
        assert_eq!(manifest.libraries.len(), 1);

        let artifact = manifest.libraries[0]
            .downloads
            .as_ref()
            .unwrap()
            .artifact
            .as_ref()
            .unwrap();
        assert_eq!(artifact.size, 1024);
        assert!(!artifact.sha1.is_empty());
    }

    #[test]
    fn argument_flag_scan() {
        let manifest = LoaderManifest::parse(MODERN.as_bytes()).unwrap();

        assert_eq!(
            manifest.game_argument_value("--fml.forgeVersion"),
            Some("49.0.3")
        );
        assert_eq!(
            manifest.game_argument_value("--fml.mcVersion"),
            Some("1.20.4")
        );
        assert_eq!(manifest.game_argument_value("--fml.neoForgeVersion"), None);
    }

    #[test]
    fn legacy_argument_string_scan() {
        let manifest = LoaderManifest::parse(LEGACY.as_bytes()).unwrap();

        assert_eq!(
            manifest.game_argument_value("--tweakClass"),
            Some("net.minecraftforge.fml.common.launcher.FMLTweaker")
        );
    }

    #[test]
    fn single_checksum_rule() {
        let manifest = LoaderManifest::parse(LEGACY.as_bytes()).unwrap();

        assert_eq!(
            manifest.libraries[0].single_checksum(),
            Some("e57430e1e0bf78c52530e5b057ad4bf0f1e0ffbd")
        );
        // two declared checksums are treated as unverifiable
        assert_eq!(manifest.libraries[1].single_checksum(), None);
    }

    #[test]
    fn self_library_lookup() {
        let manifest = LoaderManifest::parse(LEGACY.as_bytes()).unwrap();

        let own = manifest
            .self_library("net.minecraftforge", "forge")
            .unwrap();
        assert_eq!(own.name.version, "1.12.2-14.23.5.2859");
        assert!(manifest.self_library("net.neoforged", "neoforge").is_none());
    }
}
