use thiserror::Error;

/// Structured error types for talaria_client
///
/// Uses thiserror for ergonomic error definitions.
/// Span context is captured by using #[instrument] on functions.
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// No strategy in the family's table covers the requested pair
    #[error("No resolver strategy covers {family} {loader_version} on game version {game_version}")]
    NoStrategyFound {
        family: String,
        game_version: String,
        loader_version: String,
    },

    /// The standalone installer could not be fetched from cache or remote
    #[error("Installer {specifier} is unavailable: {source}")]
    InstallerUnavailable {
        specifier: String,
        #[source]
        source: Box<ErrorKind>,
    },

    /// The installer exited without producing the expected manifest file
    #[error("Installer produced no manifest at {expected_path}; the working directory has been removed")]
    InstallerOutputMissing { expected_path: String },

    /// The conventional manifest entry was absent from an archive
    #[error("Manifest entry '{entry}' not found in archive {archive}")]
    ManifestNotFound { archive: String, entry: String },

    /// A placeholder token could not be resolved from the manifest arguments
    #[error("Unable to resolve placeholder: argument flag '{flag}' absent from manifest {manifest_id}")]
    PlaceholderUnresolved { flag: String, manifest_id: String },

    /// No acceptable classifier of a required expected file exists on disk
    #[error("Required artifact '{name}' missing; tried {tried:?}")]
    RequiredArtifactMissing { name: String, tried: Vec<String> },

    /// A library the installer guarantees was not in its output
    #[error("Library {specifier} expected at {path} was not produced by the installer")]
    ExpectedLibraryMissing { specifier: String, path: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    SerdeJSON(#[from] serde_json::Error),

    /// Zip file error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Checksum validation failure
    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumFailure {
        url: String,
        expected: String,
        actual: String,
    },

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Version parsing error
    #[error("Failed to parse version '{version}': {reason}")]
    VersionParse { version: String, reason: String },

    /// Environment variable missing
    #[error("Missing environment variable: {0}")]
    EnvVarMissing(String),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Semaphore acquire error
    #[error("Semaphore acquire error: {0}")]
    SemaphoreAcquire(#[from] tokio::sync::AcquireError),

    /// Talaria library error
    #[error("Talaria error: {0}")]
    Talaria(#[from] talaria::Error),

    /// Semver parsing error
    #[error("Semver parse error: {0}")]
    SemverParse(#[from] semver::Error),
}

/// Main error type
///
/// Currently just wraps ErrorKind directly. Span context can be added
/// by using tracing spans around operations that produce errors.
pub type Error = ErrorKind;

/// Error classification helpers
impl ErrorKind {
    /// Determines if this error is permanent (won't be fixed by retrying)
    ///
    /// Permanent errors include:
    /// - Uncovered (game, loader) version pairs
    /// - Malformed manifests and archives
    /// - Installer or manifest inconsistencies
    ///
    /// Transient errors include:
    /// - Network failures (might work next time)
    /// - Checksum mismatches (file might be re-uploaded)
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ErrorKind::NoStrategyFound { .. }
                | ErrorKind::InstallerOutputMissing { .. }
                | ErrorKind::ManifestNotFound { .. }
                | ErrorKind::PlaceholderUnresolved { .. }
                | ErrorKind::RequiredArtifactMissing { .. }
                | ErrorKind::ExpectedLibraryMissing { .. }
                | ErrorKind::SerdeJSON(_)
                | ErrorKind::InvalidInput(_)
                | ErrorKind::VersionParse { .. }
                | ErrorKind::Zip(_)
        )
    }

    /// Determines if this error should trigger a retry
    ///
    /// Retryable errors include:
    /// - Network failures (temporary)
    /// - Checksum failures (a mismatch triggers one redownload)
    /// - 5xx server errors (temporary)
    pub fn should_retry(&self) -> bool {
        match self {
            ErrorKind::Talaria(talaria::Error::FetchError {
                inner, ..
            }) => {
                // Retry on network errors, timeouts, or 5xx errors
                inner.is_timeout()
                    || inner.is_connect()
                    || inner
                        .status()
                        .map(|s| s.is_server_error())
                        .unwrap_or(false)
            }
            ErrorKind::Talaria(talaria::Error::ChecksumFailure {
                ..
            }) => true,
            ErrorKind::ChecksumFailure { .. } => true,
            ErrorKind::InstallerUnavailable { .. } => true,
            _ => false,
        }
    }
}

/// Helper function to create an invalid input error
pub fn invalid_input(message: impl Into<String>) -> Error {
    ErrorKind::InvalidInput(message.into())
}
