//! Environment-backed configuration for a resolution run

use std::path::PathBuf;

use talaria::version::GameVersion;

use crate::infrastructure::error::{Error, ErrorKind};
use crate::resolver::registry::LoaderFamily;

/// Everything one resolution run needs from the environment
#[derive(Debug)]
pub struct Config {
    /// Remote repository base URL the distribution is served from
    pub base_url: String,
    /// Permanent artifact repository root (libraries and version manifests)
    pub common_dir: PathBuf,
    /// Scratch root for installer working directories and unpack staging
    pub work_dir: PathBuf,
    /// Java runtime used to spawn loader installers
    pub java_executable: PathBuf,
    /// External batch-unpack tool for legacy compressed libraries
    pub unpack_executable: PathBuf,
    /// Target game version
    pub game_version: GameVersion,
    /// Target loader family
    pub loader_family: LoaderFamily,
    /// Target loader build version
    pub loader_version: String,
    /// Remove the installer working directory after a successful run
    pub discard_output: bool,
    /// Delete any cached installer output before resolving
    pub invalidate_cache: bool,
}

fn required(var: &str) -> Result<String, Error> {
    dotenvy::var(var).map_err(|_| ErrorKind::EnvVarMissing(var.to_string()))
}

fn flag(var: &str) -> bool {
    dotenvy::var(var)
        .ok()
        .and_then(|s| s.parse::<bool>().ok())
        .unwrap_or(false)
}

impl Config {
    /// Reads the run configuration from the environment
    pub fn from_env() -> Result<Config, Error> {
        let game_version = required("GAME_VERSION")?;
        let game_version =
            game_version
                .parse::<GameVersion>()
                .map_err(|err| ErrorKind::VersionParse {
                    version: game_version,
                    reason: err.to_string(),
                })?;

        let loader_family =
            required("LOADER_FAMILY")?.parse::<LoaderFamily>()?;

        Ok(Config {
            base_url: required("BASE_URL")?,
            common_dir: PathBuf::from(required("COMMON_DIR")?),
            work_dir: PathBuf::from(required("WORK_DIR")?),
            java_executable: PathBuf::from(
                dotenvy::var("JAVA_EXECUTABLE")
                    .unwrap_or_else(|_| "java".to_string()),
            ),
            unpack_executable: PathBuf::from(
                dotenvy::var("UNPACK_EXECUTABLE")
                    .unwrap_or_else(|_| "unpack200".to_string()),
            ),
            game_version,
            loader_family,
            loader_version: required("LOADER_VERSION")?,
            discard_output: flag("DISCARD_OUTPUT"),
            invalidate_cache: flag("INVALIDATE_CACHE"),
        })
    }
}
