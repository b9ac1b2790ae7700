//! On-disk artifact repository and its remote mirror
//!
//! Maps maven coordinates onto local paths under the common directory and
//! onto URLs under the distribution base URL, and provides the
//! check-then-fetch-then-persist primitives the resolver strategies build
//! on. The check/fetch/persist sequence is not atomic; concurrent runs
//! touching the same coordinate must be serialized by the caller.

use std::path::{Path, PathBuf};

use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use talaria::MavenSpecifier;
use tracing::{info, warn};

use crate::infrastructure::error::Error;

/// Local repository rooted at the common directory, mirrored remotely at
/// the base URL
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    common_dir: PathBuf,
    base_url: String,
}

impl ArtifactStore {
    pub fn new(common_dir: PathBuf, base_url: &str) -> ArtifactStore {
        ArtifactStore {
            common_dir,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Permanent location of a library artifact
    pub fn library_path(&self, spec: &MavenSpecifier) -> PathBuf {
        self.common_dir.join("libraries").join(spec.path())
    }

    /// Permanent location of a version manifest
    pub fn version_manifest_path(&self, manifest_id: &str) -> PathBuf {
        self.common_dir
            .join("versions")
            .join(manifest_id)
            .join(format!("{}.json", manifest_id))
    }

    /// Remote URL an artifact is served from
    pub fn url_for(&self, spec: &MavenSpecifier) -> String {
        format!("{}/{}", self.base_url, spec.path())
    }

    /// Remote URL of a version manifest
    pub fn manifest_url(&self, manifest_id: &str) -> String {
        format!(
            "{}/versions/{}/{}.json",
            self.base_url, manifest_id, manifest_id
        )
    }

    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    /// Checks whether an artifact exists in a remote maven repository
    pub async fn remote_exists(
        &self,
        repository: &str,
        spec: &MavenSpecifier,
    ) -> bool {
        let url = format!(
            "{}/{}",
            repository.trim_end_matches('/'),
            spec.path()
        );
        talaria::remote_file_exists(&url).await
    }

    /// Copies a staged file into the permanent library location, returning
    /// the destination path
    pub fn adopt(
        &self,
        source: &Path,
        spec: &MavenSpecifier,
    ) -> Result<PathBuf, Error> {
        let dest = self.library_path(spec);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &dest)?;
        Ok(dest)
    }

    /// Downloads an artifact from a remote maven repository, retrying
    /// transient transport failures. A checksum mismatch is not retried
    /// here; the inner download already performs the one redownload the
    /// contract allows.
    pub async fn download(
        &self,
        repository: &str,
        spec: &MavenSpecifier,
        sha1: Option<&str>,
    ) -> Result<Bytes, Error> {
        let url = format!(
            "{}/{}",
            repository.trim_end_matches('/'),
            spec.path()
        );

        self.download_url(&url, sha1).await
    }

    /// Downloads a file from an explicit URL with the same retry policy
    pub async fn download_url(
        &self,
        url: &str,
        sha1: Option<&str>,
    ) -> Result<Bytes, Error> {
        info!("{} started downloading", url);

        let bytes = (|| async { talaria::download_file(url, sha1).await })
            .retry(
                &ExponentialBuilder::default()
                    .with_max_times(3)
                    .with_max_delay(std::time::Duration::from_secs(60)),
            )
            .when(|err| matches!(err, talaria::Error::FetchError { .. }))
            .notify(|err, duration| {
                warn!("{} retrying in {:?}: {}", url, duration, err);
            })
            .await?;

        info!("{} finished downloading", url);
        Ok(bytes)
    }

    /// Writes artifact bytes to a path, creating parent directories
    pub fn persist(path: &Path, bytes: &[u8]) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Returns the bytes of an artifact, fetching and persisting it when
    /// it is absent locally. When a checksum is supplied a cached copy is
    /// verified before being reused; a mismatch discards the local bytes
    /// and redownloads once.
    pub async fn fetch_verified(
        &self,
        repository: &str,
        spec: &MavenSpecifier,
        sha1: Option<&str>,
    ) -> Result<Bytes, Error> {
        let path = self.library_path(spec);

        if Self::exists(&path) {
            let bytes = Bytes::from(std::fs::read(&path)?);

            match sha1 {
                None => return Ok(bytes),
                Some(expected) => {
                    let actual = talaria::get_hash(bytes.clone()).await?;
                    if actual == expected {
                        return Ok(bytes);
                    }
                    warn!(
                        "{} cached copy hash {} does not match {}, redownloading",
                        spec, actual, expected
                    );
                }
            }
        }

        let bytes = self.download(repository, spec, sha1).await?;
        Self::persist(&path, &bytes)?;

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ArtifactStore {
        ArtifactStore::new(
            PathBuf::from("/srv/dist/common"),
            "https://dist.example.com/repo/",
        )
    }

    #[test]
    fn library_path_follows_maven_layout() {
        let spec: MavenSpecifier =
            "net.minecraftforge:forge:1.20.4-49.0.3:universal"
                .parse()
                .unwrap();

        assert_eq!(
            store().library_path(&spec),
            PathBuf::from(
                "/srv/dist/common/libraries/net/minecraftforge/forge/1.20.4-49.0.3/forge-1.20.4-49.0.3-universal.jar"
            )
        );
    }

    #[test]
    fn url_strips_trailing_slash() {
        let spec: MavenSpecifier =
            "org.ow2.asm:asm:9.3".parse().unwrap();

        assert_eq!(
            store().url_for(&spec),
            "https://dist.example.com/repo/org/ow2/asm/asm/9.3/asm-9.3.jar"
        );
    }

    #[test]
    fn manifest_path_nests_by_id() {
        assert_eq!(
            store().version_manifest_path("1.20.4-forge-49.0.3"),
            PathBuf::from(
                "/srv/dist/common/versions/1.20.4-forge-49.0.3/1.20.4-forge-49.0.3.json"
            )
        );
    }

    #[tokio::test]
    async fn fetch_verified_reuses_matching_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            ArtifactStore::new(dir.path().to_path_buf(), "http://127.0.0.1:1");

        let spec: MavenSpecifier = "com.example:thing:1.0".parse().unwrap();
        let path = store.library_path(&spec);
        ArtifactStore::persist(&path, b"hello world").unwrap();

        // sha1 of "hello world"; no network is reachable at the repository
        // URL, so a redownload attempt would error out
        let bytes = store
            .fetch_verified(
                "http://127.0.0.1:1",
                &spec,
                Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"),
            )
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"hello world");
    }

    /// Minimal single-file repository: every request is answered with the
    /// same bytes
    async fn spawn_repository(contents: &'static [u8]) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;

                let header = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    contents.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(contents).await;
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn fetch_verified_redownloads_corrupted_cache() {
        let dir = tempfile::tempdir().unwrap();
        let repository = spawn_repository(b"hello world").await;
        let store =
            ArtifactStore::new(dir.path().to_path_buf(), &repository);

        let spec: MavenSpecifier = "com.example:thing:1.0".parse().unwrap();
        let path = store.library_path(&spec);
        ArtifactStore::persist(&path, b"corrupted bytes").unwrap();

        // sha1 of "hello world"; the cached copy cannot match it
        let bytes = store
            .fetch_verified(
                &repository,
                &spec,
                Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"),
            )
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"hello world");
        // the corrupted copy was replaced on disk
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn fetch_verified_unverified_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            ArtifactStore::new(dir.path().to_path_buf(), "http://127.0.0.1:1");

        let spec: MavenSpecifier = "com.example:thing:1.0".parse().unwrap();
        ArtifactStore::persist(&store.library_path(&spec), b"anything")
            .unwrap();

        let bytes = store
            .fetch_verified("http://127.0.0.1:1", &spec, None)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"anything");
    }
}
