//! Resolution run state and cross-cutting policy shared by the strategies

pub mod extract;
pub mod installer;
pub mod registry;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use talaria::version::GameVersion;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::error::{Error, ErrorKind};
use crate::module::Module;
use crate::store::ArtifactStore;

/// Conventional manifest entry name inside loader jars
pub const MANIFEST_ENTRY: &str = "version.json";

/// How long the security advisory pauses the run to allow cancellation
const ADVISORY_PAUSE: Duration = Duration::from_secs(10);

/// One resolution strategy, selected by the registry and driven through a
/// single `resolve` call. The returned tree is the caller's; strategies
/// keep no reference to it.
#[async_trait]
pub trait VersionStrategy: Send + std::fmt::Debug {
    /// Short human-readable strategy name for logs
    fn name(&self) -> &'static str;

    async fn resolve(&mut self) -> Result<Module, Error>;
}

/// Shared state for one resolution run. Created at strategy construction,
/// mutated only during that run, discarded afterwards.
#[derive(Debug)]
pub struct ResolverContext {
    pub store: ArtifactStore,
    /// Scratch root for installer working directories and unpack staging
    pub work_dir: PathBuf,
    pub java_executable: PathBuf,
    pub unpack_executable: PathBuf,
    pub game_version: GameVersion,
    pub loader_version: String,
    pub discard_output: bool,
    pub invalidate_cache: bool,
    /// Flipped by the caller to abort advisory pauses
    pub cancel: watch::Receiver<bool>,
}

impl ResolverContext {
    pub fn new(config: &Config, cancel: watch::Receiver<bool>) -> ResolverContext {
        ResolverContext {
            store: ArtifactStore::new(
                config.common_dir.clone(),
                &config.base_url,
            ),
            work_dir: config.work_dir.clone(),
            java_executable: config.java_executable.clone(),
            unpack_executable: config.unpack_executable.clone(),
            game_version: config.game_version,
            loader_version: config.loader_version.clone(),
            discard_output: config.discard_output,
            invalidate_cache: config.invalidate_cache,
            cancel,
        }
    }

    pub fn artifact_exists(&self, path: &Path) -> bool {
        ArtifactStore::exists(path)
    }

    /// Extracts one named entry from a jar-format archive. The archive
    /// being unreadable and the entry being absent surface the same way:
    /// the artifact does not carry the manifest it is supposed to.
    pub async fn read_manifest_from_archive(
        archive_path: &Path,
        entry_name: &str,
    ) -> Result<Bytes, Error> {
        let archive_display = archive_path.display().to_string();
        let entry = entry_name.to_string();
        let path = archive_path.to_path_buf();

        let not_found = |archive: &str, entry: &str| ErrorKind::ManifestNotFound {
            archive: archive.to_string(),
            entry: entry.to_string(),
        };

        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path)
                .map_err(|_| not_found(&archive_display, &entry))?;
            let mut archive = zip::ZipArchive::new(file)
                .map_err(|_| not_found(&archive_display, &entry))?;

            let mut entry_file = archive
                .by_name(&entry)
                .map_err(|_| not_found(&archive_display, &entry))?;

            let mut contents = Vec::new();
            entry_file.read_to_end(&mut contents)?;

            Ok::<Bytes, Error>(Bytes::from(contents))
        })
        .await?
    }

    /// Evaluates the static advisory table for the run's version pair.
    /// A vulnerable pair logs a blocking advisory and pauses the run for a
    /// cancellation window; it never fails the run, and interrupting the
    /// pause leaves no state behind.
    pub async fn security_gate(&mut self) {
        let advisory = match advisory_for(
            self.game_version,
            &self.loader_version,
        ) {
            Some(advisory) => advisory,
            None => return,
        };

        warn!("==================== SECURITY ADVISORY ====================");
        warn!("{}", advisory.summary);
        match advisory.minimum_loader {
            Some(minimum) => warn!(
                "Loader build {} is below the first patched build {} for game version {}",
                self.loader_version, minimum, self.game_version
            ),
            None => warn!(
                "No patched loader build exists for game version {}",
                self.game_version
            ),
        }
        warn!(
            "Continuing in {}s; interrupt now to abort the run",
            ADVISORY_PAUSE.as_secs()
        );
        warn!("===========================================================");

        advisory_pause(&mut self.cancel, ADVISORY_PAUSE).await;
    }
}

/// Waits out the advisory window, returning early when the caller signals
/// cancellation
pub async fn advisory_pause(
    cancel: &mut watch::Receiver<bool>,
    duration: Duration,
) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.changed() => {
            info!("Advisory pause interrupted by caller");
        }
    }
}

/// One row of the advisory table: a vulnerable game-version range and the
/// first safe loader build within it, when one exists
#[derive(Debug)]
pub struct Advisory {
    pub min_game: GameVersion,
    pub max_game: GameVersion,
    pub minimum_loader: Option<&'static str>,
    pub summary: &'static str,
}

lazy_static! {
    /// Loader builds below the listed minimum ship an exploitable log4j;
    /// ranges without a minimum never received a patched build
    static ref ADVISORIES: Vec<Advisory> = vec![
        Advisory {
            min_game: GameVersion::new(1, 18, 0),
            max_game: GameVersion::new(1, 18, 1),
            minimum_loader: Some("39.0.18"),
            summary: "Loader builds for 1.18-1.18.1 below 39.0.18 bundle a log4j vulnerable to remote code execution (CVE-2021-44228)",
        },
        Advisory {
            min_game: GameVersion::new(1, 17, 0),
            max_game: GameVersion::new(1, 17, 1),
            minimum_loader: Some("37.1.1"),
            summary: "Loader builds for 1.17-1.17.1 below 37.1.1 bundle a log4j vulnerable to remote code execution (CVE-2021-44228)",
        },
        Advisory {
            min_game: GameVersion::new(1, 7, 0),
            max_game: GameVersion::new(1, 16, 5),
            minimum_loader: None,
            summary: "All loader builds for 1.7-1.16.5 bundle a log4j vulnerable to remote code execution (CVE-2021-44228); mitigate with JVM flags",
        },
    ];
}

/// Looks up the advisory applying to a version pair, if any
pub fn advisory_for(
    game_version: GameVersion,
    loader_version: &str,
) -> Option<&'static Advisory> {
    ADVISORIES.iter().find(|advisory| {
        if !game_version.is_between(advisory.min_game, advisory.max_game) {
            return false;
        }

        match advisory.minimum_loader {
            None => true,
            Some(minimum) => {
                talaria::compare_loader_builds(loader_version, minimum)
                    == std::cmp::Ordering::Less
            }
        }
    })
}
