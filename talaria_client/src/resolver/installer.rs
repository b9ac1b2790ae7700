//! Installer-mediated resolution
//!
//! For loader builds that ship a standalone installer, the strategy runs
//! the installer against a scratch working directory, then reconciles what
//! the installer wrote against the expected-file table and the generated
//! manifest's library list. The installer's exit code is advisory only;
//! the presence of the generated manifest is the real correctness check.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use talaria::version::GameVersion;
use talaria::MavenSpecifier;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::infrastructure::error::{Error, ErrorKind};
use crate::manifest::LoaderManifest;
use crate::module::{ArtifactMeta, Module, ModuleType};
use crate::resolver::{ResolverContext, VersionStrategy};
use crate::store::ArtifactStore;

/// Placeholder token in expected-file templates, replaced once the
/// generated manifest reveals the loader build it was produced for
pub const VERSION_TOKEN: &str = "${LOADER_VERSION}";

/// Empty profile file the installer requires for its own bookkeeping
const PLACEHOLDER_PROFILES: &str = "launcher_profiles.json";

/// One logical artifact the installer is expected to produce. The
/// classifier list is a fallback order, not a set: the first classifier
/// with a file on disk wins and the rest are never consulted.
#[derive(Debug, Clone)]
pub struct ExpectedFile {
    pub name: String,
    pub template: MavenSpecifier,
    pub classifiers: Vec<Option<&'static str>>,
    pub skip_if_not_present: bool,
    pub classpath: bool,
}

/// Per-generation wiring of the installer pipeline
#[derive(Debug, Clone)]
pub struct InstallerProfile {
    pub display_name: &'static str,
    pub group: &'static str,
    pub artifact: &'static str,
    pub repository: &'static str,
    /// Manifest game-argument flag that carries the loader build
    pub version_flag: &'static str,
    /// Whether artifact versions are prefixed with the game version
    pub game_prefixed: bool,
    /// Infix of the generated manifest id (`<game>-forge-<build>`)
    pub manifest_infix: &'static str,
}

impl InstallerProfile {
    pub fn forge() -> InstallerProfile {
        InstallerProfile {
            display_name: "Forge",
            group: "net.minecraftforge",
            artifact: "forge",
            repository: "https://maven.minecraftforge.net",
            version_flag: "--fml.forgeVersion",
            game_prefixed: true,
            manifest_infix: "forge",
        }
    }

    pub fn neoforge() -> InstallerProfile {
        InstallerProfile {
            display_name: "NeoForge",
            group: "net.neoforged",
            artifact: "neoforge",
            repository: "https://maven.neoforged.net/releases",
            version_flag: "--fml.neoForgeVersion",
            game_prefixed: false,
            manifest_infix: "neoforge",
        }
    }

    /// The 1.20.1 fork era: NeoForge artifacts under Forge's coordinate
    /// scheme and 47.x numbering
    pub fn neoforge_fork() -> InstallerProfile {
        InstallerProfile {
            display_name: "NeoForge",
            group: "net.neoforged",
            artifact: "forge",
            repository: "https://maven.neoforged.net/releases",
            version_flag: "--fml.forgeVersion",
            game_prefixed: true,
            manifest_infix: "forge",
        }
    }

    /// Full artifact version for a (game, loader build) pair
    pub fn full_version(&self, game: GameVersion, build: &str) -> String {
        if self.game_prefixed {
            format!("{}-{}", game, build)
        } else {
            build.to_string()
        }
    }

    /// Identifier of the manifest the installer generates under
    /// `versions/<id>/<id>.json`
    pub fn manifest_id(&self, game: GameVersion, build: &str) -> String {
        if self.game_prefixed {
            format!("{}-{}-{}", game, self.manifest_infix, build)
        } else {
            format!("{}-{}", self.manifest_infix, build)
        }
    }

    /// Expected-file templates; versions carry the placeholder token until
    /// the generated manifest resolves them
    pub fn expected_files(&self) -> Vec<ExpectedFile> {
        let template = MavenSpecifier {
            group: self.group.to_string(),
            artifact: self.artifact.to_string(),
            version: VERSION_TOKEN.to_string(),
            classifier: None,
            extension: "jar".to_string(),
        };

        vec![
            ExpectedFile {
                name: self.display_name.to_string(),
                template: template.clone(),
                classifiers: vec![Some("universal"), Some("client")],
                skip_if_not_present: false,
                classpath: true,
            },
            ExpectedFile {
                name: format!("{} Client Shim", self.display_name),
                template,
                classifiers: vec![Some("shim")],
                skip_if_not_present: true,
                classpath: false,
            },
        ]
    }
}

/// Resolves placeholder tokens in the expected-file templates from the
/// manifest's argument list. Pure: the template list is never touched, a
/// new fully-resolved list is returned.
pub fn resolve_expected_files(
    profile: &InstallerProfile,
    manifest: &LoaderManifest,
    game: GameVersion,
) -> Result<Vec<ExpectedFile>, Error> {
    let build = manifest
        .game_argument_value(profile.version_flag)
        .ok_or_else(|| ErrorKind::PlaceholderUnresolved {
            flag: profile.version_flag.to_string(),
            manifest_id: manifest.id.clone(),
        })?;

    let full_version = profile.full_version(game, build);

    Ok(profile
        .expected_files()
        .into_iter()
        .map(|entry| ExpectedFile {
            template: entry.template.with_version(&full_version),
            ..entry
        })
        .collect())
}

/// Reconciles the resolved expected-file list against the installer's
/// library output. Emits at most one module per entry (first matching
/// classifier wins) and copies each hit into permanent storage.
pub async fn reconcile_expected_files(
    store: &ArtifactStore,
    work_dir: &Path,
    entries: &[ExpectedFile],
) -> Result<Vec<Module>, Error> {
    let mut modules = Vec::new();

    for entry in entries {
        debug_assert!(!entry.template.has_placeholder());

        let mut tried = Vec::new();
        let mut found = None;

        for classifier in &entry.classifiers {
            let candidate = entry.template.with_classifier(*classifier);
            let path = work_dir.join("libraries").join(candidate.path());

            if ArtifactStore::exists(&path) {
                found = Some((candidate, path));
                break;
            }
            tried.push(path.display().to_string());
        }

        match found {
            Some((spec, path)) => {
                let dest = store.adopt(&path, &spec)?;
                let meta =
                    ArtifactMeta::from_file(&dest, store.url_for(&spec))
                        .await?;
                let mut module = Module::new(
                    &spec,
                    entry.name.clone(),
                    ModuleType::Library,
                    meta,
                );
                module.classpath = entry.classpath;
                modules.push(module);
            }
            None if entry.skip_if_not_present => {
                info!("{} not present, skipping", entry.name);
            }
            None => {
                return Err(ErrorKind::RequiredArtifactMissing {
                    name: entry.name.clone(),
                    tried,
                })
            }
        }
    }

    Ok(modules)
}

/// Requires every manifest library with a populated download descriptor to
/// exist in the installer's library output; these are guaranteed by the
/// installer, so absence means it malfunctioned. Records with an empty
/// download URL are the loader's own files, covered by the expected-file
/// table instead.
pub async fn reconcile_manifest_libraries(
    store: &ArtifactStore,
    work_dir: &Path,
    manifest: &LoaderManifest,
) -> Result<Vec<Module>, Error> {
    let mut modules = Vec::new();

    for lib in &manifest.libraries {
        let artifact = match lib
            .downloads
            .as_ref()
            .and_then(|downloads| downloads.artifact.as_ref())
        {
            Some(artifact) if !artifact.url.is_empty() => artifact,
            _ => continue,
        };

        let relative = artifact
            .path
            .clone()
            .unwrap_or_else(|| lib.name.path());
        let path = work_dir.join("libraries").join(&relative);

        if !ArtifactStore::exists(&path) {
            return Err(ErrorKind::ExpectedLibraryMissing {
                specifier: lib.name.to_string(),
                path: path.display().to_string(),
            });
        }

        let dest = store.adopt(&path, &lib.name)?;
        let meta = ArtifactMeta::from_file(&dest, store.url_for(&lib.name))
            .await?;
        modules.push(Module::new(
            &lib.name,
            lib.name.artifact.clone(),
            ModuleType::Library,
            meta,
        ));
    }

    Ok(modules)
}

#[derive(Debug)]
pub struct InstallerStrategy {
    ctx: ResolverContext,
    profile: InstallerProfile,
}

impl InstallerStrategy {
    pub fn new(
        ctx: ResolverContext,
        profile: InstallerProfile,
    ) -> InstallerStrategy {
        InstallerStrategy { ctx, profile }
    }

    fn installer_specifier(&self) -> MavenSpecifier {
        MavenSpecifier {
            group: self.profile.group.to_string(),
            artifact: self.profile.artifact.to_string(),
            version: self
                .profile
                .full_version(self.ctx.game_version, &self.ctx.loader_version),
            classifier: Some("installer".to_string()),
            extension: "jar".to_string(),
        }
    }

    /// Steps 1-3: make sure a working directory with installer output
    /// exists, running the installer unless a prior run's output can be
    /// reused. Returns the working directory.
    async fn stage(&mut self) -> Result<PathBuf, Error> {
        let installer_spec = self.installer_specifier();
        let manifest_id = self
            .profile
            .manifest_id(self.ctx.game_version, &self.ctx.loader_version);

        let cached_installer = self.ctx.store.library_path(&installer_spec);
        if !self.ctx.artifact_exists(&cached_installer) {
            let bytes = self
                .ctx
                .store
                .download(self.profile.repository, &installer_spec, None)
                .await
                .map_err(|err| ErrorKind::InstallerUnavailable {
                    specifier: installer_spec.to_string(),
                    source: Box::new(err),
                })?;
            ArtifactStore::persist(&cached_installer, &bytes)?;
        }

        let work_dir = self.ctx.work_dir.join(&manifest_id);
        if work_dir.is_dir() {
            if self.ctx.invalidate_cache {
                info!(
                    "Invalidating cached installer output at {}",
                    work_dir.display()
                );
                std::fs::remove_dir_all(&work_dir)?;
            } else {
                info!(
                    "Reusing cached installer output at {}",
                    work_dir.display()
                );
                return Ok(work_dir);
            }
        }

        std::fs::create_dir_all(&work_dir)?;
        let staged_installer = work_dir.join(installer_spec.filename());
        std::fs::copy(&cached_installer, &staged_installer)?;
        // the installer refuses to run without a profiles file to update
        std::fs::write(work_dir.join(PLACEHOLDER_PROFILES), b"{}")?;

        run_installer(
            &self.ctx.java_executable,
            &staged_installer,
            &work_dir,
        )
        .await?;

        Ok(work_dir)
    }

    /// Steps 4-8: verify and reconcile a staged working directory into the
    /// module tree
    async fn resolve_staged(
        &mut self,
        work_dir: &Path,
    ) -> Result<Module, Error> {
        let manifest_id = self
            .profile
            .manifest_id(self.ctx.game_version, &self.ctx.loader_version);

        let generated = work_dir
            .join("versions")
            .join(&manifest_id)
            .join(format!("{}.json", manifest_id));

        if !self.ctx.artifact_exists(&generated) {
            // a misdirected installer must not leave a directory that
            // looks cached on the next run
            let expected_path = generated.display().to_string();
            std::fs::remove_dir_all(work_dir)?;
            return Err(ErrorKind::InstallerOutputMissing { expected_path });
        }

        let manifest_bytes = Bytes::from(std::fs::read(&generated)?);
        let manifest = LoaderManifest::parse(&manifest_bytes)?;

        let expected = resolve_expected_files(
            &self.profile,
            &manifest,
            self.ctx.game_version,
        )?;

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

        let mut generated_modules =
            reconcile_expected_files(&self.ctx.store, work_dir, &expected)
                .await?;
        let library_modules = reconcile_manifest_libraries(
            &self.ctx.store,
            work_dir,
            &manifest,
        )
        .await?;

        if generated_modules.is_empty() {
            return Err(ErrorKind::RequiredArtifactMissing {
                name: self.profile.display_name.to_string(),
                tried: Vec::new(),
            });
        }

        // the first expected file is the loader itself
        let mut root = generated_modules.remove(0);
        root.module_type = ModuleType::LoaderRoot;
        root.sub_modules.push(manifest_module);
        root.sub_modules.extend(generated_modules);
        root.sub_modules.extend(library_modules);

        if self.ctx.discard_output {
            info!(
                "Discarding installer output at {}",
                work_dir.display()
            );
            std::fs::remove_dir_all(work_dir)?;
        }

        Ok(root)
    }
}

#[async_trait]
impl VersionStrategy for InstallerStrategy {
    fn name(&self) -> &'static str {
        "installer-mediated"
    }

    async fn resolve(&mut self) -> Result<Module, Error> {
        self.ctx.security_gate().await;

        let work_dir = self.stage().await?;
        self.resolve_staged(&work_dir).await
    }
}

/// Spawns the installer and blocks until it exits, streaming its output to
/// the logger. The exit code is recorded but not fatal; manifest
/// verification afterwards is the real check. There is no deadline, so a
/// hung installer blocks the run.
async fn run_installer(
    java: &Path,
    installer_path: &Path,
    work_dir: &Path,
) -> Result<(), Error> {
    info!("Executing installer {}", installer_path.display());

    let mut child = Command::new(java)
        .arg("-jar")
        .arg(installer_path)
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!("installer: {}", line);
            }
        }
    });
    let stderr_task = tokio::spawn(async move {
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("installer: {}", line);
            }
        }
    });

    let status = child.wait().await?;
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    if status.success() {
        info!("Installer exited with {}", status);
    } else {
        warn!(
            "Installer exited with {}; verifying its output anyway",
            status
        );
    }

    Ok(())
}
