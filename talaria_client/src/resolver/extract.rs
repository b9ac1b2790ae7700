//! Direct-extraction resolution
//!
//! Legacy loader builds embed everything in the universal jar: the version
//! manifest is an archive entry rather than installer output, and some of
//! the declared libraries are distributed in an older compressed form that
//! must be unpacked by an external tool after staging. Checksums declared
//! for the compressed form are unreliable and are deliberately not
//! verified before download; only existence is enforced for that format,
//! and the decompressed content is hashed after the batch unpack instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use talaria::version::GameVersion;
use talaria::MavenSpecifier;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::infrastructure::error::{invalid_input, Error};
use crate::manifest::{LoaderManifest, ManifestLibrary};
use crate::module::{ArtifactMeta, Module, ModuleType};
use crate::resolver::{ResolverContext, VersionStrategy, MANIFEST_ENTRY};
use crate::store::ArtifactStore;

/// Extension of the older compressed library distribution format
pub const COMPRESSED_EXTENSION: &str = "jar.pack.xz";

/// Fallback repository for records that carry no URL of their own
const MOJANG_REPOSITORY: &str = "https://libraries.minecraft.net";

/// Bound on concurrent library reconciliation
const LIBRARY_WORKERS: usize = 6;

/// Per-generation wiring of the extraction pipeline
#[derive(Debug, Clone)]
pub struct ExtractProfile {
    pub display_name: &'static str,
    pub group: &'static str,
    pub artifact: &'static str,
    pub repository: &'static str,
    /// Classifier of the main artifact carrying the embedded manifest
    pub classifier: Option<&'static str>,
    pub manifest_infix: &'static str,
}

impl ExtractProfile {
    pub fn forge_legacy() -> ExtractProfile {
        ExtractProfile {
            display_name: "Forge",
            group: "net.minecraftforge",
            artifact: "forge",
            repository: "https://maven.minecraftforge.net",
            classifier: Some("universal"),
            manifest_infix: "forge",
        }
    }

    pub fn full_version(&self, game: GameVersion, build: &str) -> String {
        format!("{}-{}", game, build)
    }

    pub fn manifest_id(&self, game: GameVersion, build: &str) -> String {
        format!("{}-{}-{}", game, self.manifest_infix, build)
    }
}

/// Strips the compressed suffix from a staged file path, yielding the
/// sibling the unpack tool produces
pub fn decompressed_sibling(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stripped = name.strip_suffix(".pack.xz")?;
    Some(path.with_file_name(stripped))
}

#[derive(Debug)]
pub struct ExtractStrategy {
    ctx: ResolverContext,
    profile: ExtractProfile,
}

impl ExtractStrategy {
    pub fn new(
        ctx: ResolverContext,
        profile: ExtractProfile,
    ) -> ExtractStrategy {
        ExtractStrategy { ctx, profile }
    }

    fn main_specifier(&self) -> MavenSpecifier {
        MavenSpecifier {
            group: self.profile.group.to_string(),
            artifact: self.profile.artifact.to_string(),
            version: self
                .profile
                .full_version(self.ctx.game_version, &self.ctx.loader_version),
            classifier: self.profile.classifier.map(|x| x.to_string()),
            extension: "jar".to_string(),
        }
    }

    fn is_self_record(&self, lib: &ManifestLibrary) -> bool {
        lib.name.group == self.profile.group
            && lib.name.artifact == self.profile.artifact
    }
}

#[async_trait]
impl VersionStrategy for ExtractStrategy {
    fn name(&self) -> &'static str {
        "direct-extraction"
    }

    async fn resolve(&mut self) -> Result<Module, Error> {
        self.ctx.security_gate().await;

        let main_spec = self.main_specifier();
        let manifest_id = self
            .profile
            .manifest_id(self.ctx.game_version, &self.ctx.loader_version);

        // the manifest lives inside the main artifact, so that one must
        // be fetched before anything can be verified
        let main_path = self.ctx.store.library_path(&main_spec);
        if !self.ctx.artifact_exists(&main_path) {
            let bytes = self
                .ctx
                .store
                .download(self.profile.repository, &main_spec, None)
                .await?;
            ArtifactStore::persist(&main_path, &bytes)?;
        }

        let manifest_bytes = ResolverContext::read_manifest_from_archive(
            &main_path,
            MANIFEST_ENTRY,
        )
        .await?;
        let manifest = LoaderManifest::parse(&manifest_bytes)?;

        ArtifactStore::persist(
            &self.ctx.store.version_manifest_path(&manifest_id),
            &manifest_bytes,
        )?;
        let manifest_module = Module::manifest(
            manifest.id.clone(),
            format!("{} (version.json)", self.profile.display_name),
            ArtifactMeta::from_bytes(
                manifest_bytes,
                self.ctx.store.manifest_url(&manifest_id),
            )
            .await?,
        );

        // the manifest's record for the loader itself carries the
        // authoritative hash of the main artifact
        let declared = manifest
            .self_library(self.profile.group, self.profile.artifact)
            .and_then(|lib| lib.single_checksum())
            .map(|sum| sum.to_string());

        let main_bytes = self
            .ctx
            .store
            .fetch_verified(
                self.profile.repository,
                &main_spec,
                declared.as_deref(),
            )
            .await?;

        let mut root = Module::new(
            &main_spec,
            self.profile.display_name,
            ModuleType::LoaderRoot,
            ArtifactMeta::from_bytes(
                main_bytes,
                self.ctx.store.url_for(&main_spec),
            )
            .await?,
        );
        root.sub_modules.push(manifest_module);

        // per-library reconciliation is independent once the manifest is
        // parsed; try_join_all keeps the children in manifest order
        let semaphore = Arc::new(Semaphore::new(LIBRARY_WORKERS));
        let ctx = &self.ctx;
        let resolved = futures::future::try_join_all(
            manifest
                .libraries
                .iter()
                .filter(|lib| !self.is_self_record(lib))
                .map(|lib| {
                    let semaphore = semaphore.clone();
                    async move {
                        let _permit = semaphore.acquire().await?;
                        resolve_library(ctx, lib).await
                    }
                }),
        )
        .await?;

        let mut queue = Vec::new();
        for (module, compressed_path) in resolved {
            if let Some(path) = compressed_path {
                queue.push((root.sub_modules.len(), path));
            }
            root.sub_modules.push(module);
        }

        if !queue.is_empty() {
            info!("Unpacking {} compressed libraries", queue.len());
            unpack_batch(ctx, &mut root.sub_modules, queue).await?;
        }

        Ok(root)
    }
}

fn library_repository(lib: &ManifestLibrary) -> &str {
    match &lib.url {
        Some(url) if !url.is_empty() => url.trim_end_matches('/'),
        _ => MOJANG_REPOSITORY,
    }
}

/// Determines a library's on-disk format. Explicitly typed coordinates are
/// trusted; plain-jar names are probed in priority order, compressed form
/// first, locally and then remotely, defaulting to plain.
async fn resolve_extension(
    ctx: &ResolverContext,
    repository: &str,
    lib: &ManifestLibrary,
) -> String {
    if lib.name.extension != "jar" {
        return lib.name.extension.clone();
    }

    let compressed = lib.name.with_extension(COMPRESSED_EXTENSION);

    if ctx.artifact_exists(&ctx.store.library_path(&compressed)) {
        return COMPRESSED_EXTENSION.to_string();
    }
    if ctx.artifact_exists(&ctx.store.library_path(&lib.name)) {
        return "jar".to_string();
    }

    for spec in [&compressed, &lib.name] {
        if ctx.store.remote_exists(repository, spec).await {
            return spec.extension.clone();
        }
    }

    "jar".to_string()
}

/// Stages one library: settles its format, applies the hash-verification
/// rule, and builds its module. Returns the local path alongside the
/// module when the library is compressed and needs unpacking.
async fn resolve_library(
    ctx: &ResolverContext,
    lib: &ManifestLibrary,
) -> Result<(Module, Option<PathBuf>), Error> {
    let repository = library_repository(lib);
    let extension = resolve_extension(ctx, repository, lib).await;
    let compressed = extension.ends_with("pack.xz");
    let spec = lib.name.with_extension(&extension);

    // checksums declared for the compressed format are unreliable and
    // skipped; existence is the only requirement there
    let declared = if compressed {
        None
    } else {
        lib.single_checksum()
    };

    let bytes = ctx
        .store
        .fetch_verified(repository, &spec, declared)
        .await?;

    let meta =
        ArtifactMeta::from_bytes(bytes, ctx.store.url_for(&spec)).await?;
    let module = Module::new(
        &spec,
        lib.name.artifact.clone(),
        ModuleType::Library,
        meta,
    );

    let path = compressed.then(|| ctx.store.library_path(&spec));
    Ok((module, path))
}

/// Copies every queued compressed library into a scratch directory, runs
/// the external unpack tool once over the batch, and patches each module's
/// descriptor with the hash of its decompressed form. The scratch
/// directory is removed whatever the outcome.
async fn unpack_batch(
    ctx: &ResolverContext,
    modules: &mut [Module],
    queue: Vec<(usize, PathBuf)>,
) -> Result<(), Error> {
    let scratch = ctx.work_dir.join("unpack");
    if scratch.exists() {
        std::fs::remove_dir_all(&scratch)?;
    }
    std::fs::create_dir_all(&scratch)?;

    let outcome = async {
        let mut staged = Vec::new();
        for (index, source) in &queue {
            let file_name = source.file_name().ok_or_else(|| {
                invalid_input(format!(
                    "Queued library has no file name: {}",
                    source.display()
                ))
            })?;
            let dest = scratch.join(file_name);
            std::fs::copy(source, &dest)?;
            staged.push((*index, dest));
        }

        let status = Command::new(&ctx.unpack_executable)
            .args(staged.iter().map(|(_, path)| path))
            .status()
            .await?;
        if !status.success() {
            warn!("Unpack tool exited with {}", status);
        }

        for (index, staged_path) in staged {
            let unpacked =
                decompressed_sibling(&staged_path).ok_or_else(|| {
                    invalid_input(format!(
                        "Staged library is not in compressed form: {}",
                        staged_path.display()
                    ))
                })?;
            if !unpacked.is_file() {
                return Err(invalid_input(format!(
                    "Unpack tool produced no output for {}",
                    staged_path.display()
                )));
            }

            let bytes = Bytes::from(std::fs::read(&unpacked)?);
            let hash = talaria::get_hash(bytes).await?;
            modules[index].artifact.decompressed_sha1 = Some(hash);
        }

        Ok(())
    }
    .await;

    let _ = std::fs::remove_dir_all(&scratch);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::resolver::registry::LoaderFamily;
    use tempfile::TempDir;
    use tokio::sync::watch;

    fn context(dir: &TempDir) -> ResolverContext {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);

        let config = Config {
            // nothing listens here, so remote probes fail fast
            base_url: "http://127.0.0.1:1".to_string(),
            common_dir: dir.path().join("common"),
            work_dir: dir.path().join("work"),
            java_executable: PathBuf::from("java"),
            unpack_executable: PathBuf::from("unpack200"),
            game_version: "1.12.2".parse().unwrap(),
            loader_family: LoaderFamily::Forge,
            loader_version: "14.23.5.2859".to_string(),
            discard_output: false,
            invalidate_cache: false,
        };

        ResolverContext::new(&config, rx)
    }

    fn library(json: &str) -> ManifestLibrary {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn profile_identifiers() {
        let profile = ExtractProfile::forge_legacy();
        let game: GameVersion = "1.12.2".parse().unwrap();

        assert_eq!(
            profile.full_version(game, "14.23.5.2859"),
            "1.12.2-14.23.5.2859"
        );
        assert_eq!(
            profile.manifest_id(game, "14.23.5.2859"),
            "1.12.2-forge-14.23.5.2859"
        );
    }

    #[test]
    fn decompressed_sibling_strips_suffix() {
        assert_eq!(
            decompressed_sibling(Path::new("/tmp/unpack/asm-9.5.jar.pack.xz")),
            Some(PathBuf::from("/tmp/unpack/asm-9.5.jar"))
        );
        assert_eq!(
            decompressed_sibling(Path::new("/tmp/unpack/asm-9.5.jar")),
            None
        );
    }

    #[tokio::test]
    async fn extension_prefers_local_compressed_copy() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let lib = library(
            r#"{"name": "org.scala-lang:scala-library:2.11.1",
                "url": "http://127.0.0.1:1/",
                "checksums": ["aa"]}"#,
        );

        let compressed_spec =
            lib.name.with_extension(COMPRESSED_EXTENSION);
        ArtifactStore::persist(
            &ctx.store.library_path(&compressed_spec),
            b"compressed",
        )
        .unwrap();

        let extension =
            resolve_extension(&ctx, "http://127.0.0.1:1", &lib).await;
        assert_eq!(extension, COMPRESSED_EXTENSION);
    }

    #[tokio::test]
    async fn extension_falls_back_to_local_plain_then_default() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let lib = library(
            r#"{"name": "org.ow2.asm:asm:9.5", "url": "http://127.0.0.1:1/"}"#,
        );

        ArtifactStore::persist(
            &ctx.store.library_path(&lib.name),
            b"plain jar",
        )
        .unwrap();
        assert_eq!(
            resolve_extension(&ctx, "http://127.0.0.1:1", &lib).await,
            "jar"
        );

        // nothing local, remote unreachable: plain is the default
        let absent = library(
            r#"{"name": "org.ow2.asm:asm-tree:9.5", "url": "http://127.0.0.1:1/"}"#,
        );
        assert_eq!(
            resolve_extension(&ctx, "http://127.0.0.1:1", &absent).await,
            "jar"
        );
    }

    #[tokio::test]
    async fn explicitly_typed_coordinates_are_not_probed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let lib = library(
            r#"{"name": "org.scala-lang:scala-library:2.11.1@zip"}"#,
        );

        assert_eq!(
            resolve_extension(&ctx, "http://127.0.0.1:1", &lib).await,
            "zip"
        );
    }

    #[tokio::test]
    async fn compressed_library_skips_checksum_verification() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        // declared checksum would never match the staged bytes; for the
        // compressed format it must not be consulted at all
        let lib = library(
            r#"{"name": "org.scala-lang:scala-library:2.11.1",
                "url": "http://127.0.0.1:1/",
                "checksums": ["0000000000000000000000000000000000000000"]}"#,
        );

        let compressed_spec = lib.name.with_extension(COMPRESSED_EXTENSION);
        let local = ctx.store.library_path(&compressed_spec);
        ArtifactStore::persist(&local, b"compressed bytes").unwrap();

        let (module, queued) = resolve_library(&ctx, &lib).await.unwrap();

        assert_eq!(queued, Some(local));
        assert!(module.id.ends_with("@jar.pack.xz"));
        assert!(!module.artifact.sha1.is_empty());
        assert_eq!(module.artifact.decompressed_sha1, None);
    }

    #[tokio::test]
    async fn plain_library_with_matching_checksum_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        // sha1 of "hello world"
        let lib = library(
            r#"{"name": "org.ow2.asm:asm:9.5",
                "url": "http://127.0.0.1:1/",
                "checksums": ["2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"]}"#,
        );

        ArtifactStore::persist(
            &ctx.store.library_path(&lib.name),
            b"hello world",
        )
        .unwrap();

        let (module, queued) = resolve_library(&ctx, &lib).await.unwrap();
        assert_eq!(queued, None);
        assert_eq!(
            module.artifact.sha1,
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[cfg(unix)]
    fn fake_unpack_tool(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        // mimics the real tool's contract: a sibling with the suffix
        // stripped, contents differing from the compressed input
        let path = dir.join("fake-unpack.sh");
        std::fs::write(
            &path,
            "#!/bin/sh\nfor f in \"$@\"; do cp \"$f\" \"${f%.pack.xz}\"; printf x >> \"${f%.pack.xz}\"; done\n",
        )
        .unwrap();
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn batch_unpack_patches_secondary_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        ctx.unpack_executable = fake_unpack_tool(dir.path());

        let mut modules = Vec::new();
        let mut queue = Vec::new();
        for (i, contents) in
            [&b"first library"[..], &b"second library"[..]]
                .iter()
                .enumerate()
        {
            let spec: MavenSpecifier =
                format!("com.example:lib{}:1.0@{}", i, COMPRESSED_EXTENSION)
                    .parse()
                    .unwrap();
            let path = ctx.store.library_path(&spec);
            ArtifactStore::persist(&path, contents).unwrap();

            let meta = ArtifactMeta::from_bytes(
                Bytes::copy_from_slice(contents),
                "u".to_string(),
            )
            .await
            .unwrap();
            queue.push((modules.len(), path));
            modules.push(Module::new(
                &spec,
                format!("lib{}", i),
                ModuleType::Library,
                meta,
            ));
        }

        unpack_batch(&ctx, &mut modules, queue).await.unwrap();

        for module in &modules {
            let secondary =
                module.artifact.decompressed_sha1.as_ref().unwrap();
            assert_ne!(secondary, &module.artifact.sha1);
        }
        // scratch directory is gone afterwards
        assert!(!ctx.work_dir.join("unpack").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unpack_failure_still_removes_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        // a tool that produces nothing
        ctx.unpack_executable = PathBuf::from("true");

        let spec: MavenSpecifier =
            format!("com.example:lib:1.0@{}", COMPRESSED_EXTENSION)
                .parse()
                .unwrap();
        let path = ctx.store.library_path(&spec);
        ArtifactStore::persist(&path, b"bytes").unwrap();

        let meta = ArtifactMeta::from_bytes(
            Bytes::from_static(b"bytes"),
            "u".to_string(),
        )
        .await
        .unwrap();
        let mut modules = vec![Module::new(
            &spec,
            "lib",
            ModuleType::Library,
            meta,
        )];

        let err = unpack_batch(&ctx, &mut modules, vec![(0, path)])
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(!ctx.work_dir.join("unpack").exists());
    }
}
