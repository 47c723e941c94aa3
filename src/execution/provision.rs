//! Environment provisioning and the shared dependency cache

use crate::core::job::{DependencySpec, JobInstance, RuntimeSpec};
use crate::execution::cancel::CancelToken;
use crate::execution::process::{run_shell, ProcessExit, ProcessLimits};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marker written into a cache entry once its install finished
pub const COMPLETE_MARKER: &str = ".complete";

/// Errors raised while provisioning an environment
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("platform '{platform}' is not available on this host ({host})")]
    UnsupportedPlatform { platform: String, host: String },

    #[error("cannot read dependency manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dependency install failed with exit code {code}: {output}")]
    InstallFailed { code: i32, output: String },

    #[error("dependency install timed out after {0:?}")]
    InstallTimedOut(Duration),

    #[error("provisioning cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Isolated, ephemeral execution environment for one job instance
///
/// The backing directory is removed when the environment is dropped.
#[derive(Debug)]
pub struct Environment {
    root: TempDir,
    workspace: PathBuf,
    deps: PathBuf,

    /// Variables every step of the instance sees
    pub env: HashMap<String, String>,

    /// Runtime this environment was provisioned with
    pub runtime: RuntimeSpec,

    /// Provisioning cache entry the dependencies came from
    pub cache_key: Option<String>,
}

impl Environment {
    /// Create an empty environment for the instance
    pub fn ephemeral(instance: &JobInstance) -> io::Result<Self> {
        let root = tempfile::Builder::new().prefix("flowline-").tempdir()?;
        let workspace = root.path().join("workspace");
        let deps = root.path().join("deps");
        std::fs::create_dir_all(&workspace)?;
        std::fs::create_dir_all(deps.join("bin"))?;
        std::fs::create_dir_all(root.path().join("outputs"))?;

        let mut env = HashMap::new();
        env.insert("FLOWLINE_WORKSPACE".to_string(), path_string(&workspace));
        env.insert("FLOWLINE_DEPS_DIR".to_string(), path_string(&deps));
        env.insert("FLOWLINE_JOB".to_string(), instance.job_name.clone());
        env.insert("FLOWLINE_INSTANCE".to_string(), instance.name.clone());
        env.insert(
            "FLOWLINE_RUNTIME_VERSION".to_string(),
            instance.runtime.version.clone().unwrap_or_default(),
        );
        env.insert(
            "FLOWLINE_RUNTIME_PLATFORM".to_string(),
            instance
                .runtime
                .platform
                .clone()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
        );

        let bin = path_string(&deps.join("bin"));
        let path = match std::env::var("PATH") {
            Ok(existing) if !existing.is_empty() => format!("{}:{}", bin, existing),
            _ => bin,
        };
        env.insert("PATH".to_string(), path);

        Ok(Self {
            root,
            workspace,
            deps,
            env,
            runtime: instance.runtime.clone(),
            cache_key: None,
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Working directory shared by the instance's steps
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn deps_dir(&self) -> &Path {
        &self.deps
    }

    /// File a command step appends `key=value` output lines to.
    ///
    /// The name carries a digest of the full id, so ids that sanitize to the
    /// same text still get distinct files.
    pub fn output_file(&self, step_id: &str) -> PathBuf {
        let name: String = step_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let digest = format!("{:x}", Sha256::digest(step_id.as_bytes()));
        self.root
            .path()
            .join("outputs")
            .join(format!("{}-{}.env", name, &digest[..12]))
    }
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

/// Acquires environments for job instances
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        instance: &JobInstance,
        cancel: &CancelToken,
    ) -> Result<Environment, ProvisionError>;
}

/// Platform family a runtime label resolves to
fn platform_family(label: &str) -> Option<&'static str> {
    let label = label.to_ascii_lowercase();
    if label == "any" || label == "local" {
        return Some(std::env::consts::OS);
    }
    if label.starts_with("ubuntu") || label.starts_with("linux") || label.starts_with("debian") {
        Some("linux")
    } else if label.starts_with("macos") || label.starts_with("darwin") {
        Some("macos")
    } else if label.starts_with("windows") {
        Some("windows")
    } else {
        None
    }
}

/// Check a runtime platform label against the host OS
pub fn check_platform(runtime: &RuntimeSpec) -> Result<(), ProvisionError> {
    let Some(platform) = &runtime.platform else {
        return Ok(());
    };
    let host = std::env::consts::OS;
    match platform_family(platform) {
        Some(family) if family == host => Ok(()),
        _ => Err(ProvisionError::UnsupportedPlatform {
            platform: platform.clone(),
            host: host.to_string(),
        }),
    }
}

/// What to install for one cache entry
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub runtime: RuntimeSpec,
    pub dependencies: DependencySpec,

    /// Manifest path and its contents, if the dependency set names one
    pub manifest: Option<(PathBuf, Vec<u8>)>,
}

impl InstallPlan {
    /// Content-addressed cache key
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |name: &str, value: &[u8]| {
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value);
        };

        field("platform", self.runtime.platform.as_deref().unwrap_or("").as_bytes());
        field("version", self.runtime.version.as_deref().unwrap_or("").as_bytes());
        for package in &self.dependencies.packages {
            field("package", package.as_bytes());
        }
        if let Some((_, contents)) = &self.manifest {
            field("manifest", contents);
        }
        field("install", self.dependencies.install.as_deref().unwrap_or("").as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Shared, content-addressed store of installed dependency sets
///
/// Each key installs at most once; concurrent requests for the same key wait
/// for the first one. Entries are only ever read after publication.
#[derive(Debug)]
pub struct ProvisionCache {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    installs: AtomicUsize,
    limits: ProcessLimits,
}

impl ProvisionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
            installs: AtomicUsize::new(0),
            limits: ProcessLimits {
                timeout: Duration::from_secs(1800),
                grace_period: Duration::from_secs(5),
                max_output_bytes: 64 * 1024,
            },
        }
    }

    /// Cache under the user's cache directory
    pub fn with_default_path() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("flowline")
            .join("deps");
        Self::new(root)
    }

    pub fn with_limits(mut self, limits: ProcessLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Installs performed by this cache instance
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.entry_path(key).join(COMPLETE_MARKER).exists()
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Return the published directory for `plan`, installing it first if needed
    pub async fn materialize(
        &self,
        plan: &InstallPlan,
        cancel: &CancelToken,
    ) -> Result<(String, PathBuf), ProvisionError> {
        let key = plan.cache_key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let entry = self.entry_path(&key);
        if self.is_cached(&key) {
            debug!("Provisioning cache hit: {}", &key[..12]);
            return Ok((key, entry));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let staging = self.root.join(format!("{}.partial-{}", key, Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;

        info!("Installing dependencies into cache entry {}", &key[..12]);
        self.installs.fetch_add(1, Ordering::SeqCst);

        match self.install(plan, &staging, cancel).await {
            Ok(()) => {
                tokio::fs::write(staging.join(COMPLETE_MARKER), b"").await?;
                publish(&staging, &entry).await?;
                Ok((key, entry))
            }
            Err(e) => {
                discard(&staging).await;
                Err(e)
            }
        }
    }

    async fn install(
        &self,
        plan: &InstallPlan,
        staging: &Path,
        cancel: &CancelToken,
    ) -> Result<(), ProvisionError> {
        let deps = &plan.dependencies;

        if !deps.packages.is_empty() {
            let mut listing = deps.packages.join("\n");
            listing.push('\n');
            tokio::fs::write(staging.join("packages.txt"), listing).await?;
        }
        let manifest_copy = match &plan.manifest {
            Some((path, contents)) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| "manifest".into());
                let copy = staging.join(name);
                tokio::fs::write(&copy, contents).await?;
                Some(copy)
            }
            None => None,
        };

        let Some(script) = &deps.install else {
            return Ok(());
        };

        let mut env = HashMap::new();
        env.insert("FLOWLINE_DEPS_DIR".to_string(), path_string(staging));
        env.insert("FLOWLINE_PACKAGES".to_string(), deps.packages.join(" "));
        env.insert(
            "FLOWLINE_RUNTIME_VERSION".to_string(),
            plan.runtime.version.clone().unwrap_or_default(),
        );
        if let Some(copy) = &manifest_copy {
            env.insert("FLOWLINE_MANIFEST".to_string(), path_string(copy));
        }

        let result = run_shell(script, staging, &env, self.limits, cancel).await?;
        match result.exit {
            ProcessExit::Exited(0) => Ok(()),
            ProcessExit::Exited(code) => Err(ProvisionError::InstallFailed {
                code,
                output: result.output.trim().to_string(),
            }),
            ProcessExit::TimedOut => Err(ProvisionError::InstallTimedOut(self.limits.timeout)),
            ProcessExit::Cancelled => Err(ProvisionError::Cancelled),
        }
    }
}

/// Move a finished staging directory into place.
///
/// The cache root is shared between processes, so another one may have
/// published the same key while this install ran. A complete entry is never
/// replaced: instances may be copying from it.
async fn publish(staging: &Path, entry: &Path) -> io::Result<()> {
    if entry.join(COMPLETE_MARKER).exists() {
        debug!("Cache entry {} was published concurrently", entry.display());
        discard(staging).await;
        return Ok(());
    }
    if entry.exists() {
        // Without the marker nothing reads from it
        tokio::fs::remove_dir_all(entry).await?;
    }

    match tokio::fs::rename(staging, entry).await {
        Ok(()) => Ok(()),
        Err(_) if entry.join(COMPLETE_MARKER).exists() => {
            debug!("Cache entry {} was published concurrently", entry.display());
            discard(staging).await;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn discard(staging: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(staging).await {
        warn!("Failed to remove staging dir {}: {}", staging.display(), e);
    }
}

/// Provisions environments on the local host
#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    cache: Arc<ProvisionCache>,
    source_dir: Option<PathBuf>,
}

impl LocalProvisioner {
    pub fn new(cache: Arc<ProvisionCache>) -> Self {
        Self {
            cache,
            source_dir: None,
        }
    }

    /// Resolve dependency manifests relative to `dir`
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    pub fn cache(&self) -> &Arc<ProvisionCache> {
        &self.cache
    }

    async fn read_manifest(&self, manifest: &str) -> Result<(PathBuf, Vec<u8>), ProvisionError> {
        let path = match &self.source_dir {
            Some(dir) => dir.join(manifest),
            None => PathBuf::from(manifest),
        };
        let contents = tokio::fs::read(&path)
            .await
            .map_err(|source| ProvisionError::Manifest {
                path: path.clone(),
                source,
            })?;
        Ok((path, contents))
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn provision(
        &self,
        instance: &JobInstance,
        cancel: &CancelToken,
    ) -> Result<Environment, ProvisionError> {
        check_platform(&instance.runtime)?;
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let mut environment = Environment::ephemeral(instance)?;

        if !instance.dependencies.is_empty() {
            let manifest = match &instance.dependencies.manifest {
                Some(manifest) => Some(self.read_manifest(manifest).await?),
                None => None,
            };
            let plan = InstallPlan {
                runtime: instance.runtime.clone(),
                dependencies: instance.dependencies.clone(),
                manifest,
            };

            let (key, cached) = self.cache.materialize(&plan, cancel).await?;
            let target = environment.deps_dir().to_path_buf();
            tokio::task::spawn_blocking(move || copy_dir(&cached, &target, &[COMPLETE_MARKER]))
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
            environment.cache_key = Some(key);
        }

        debug!(
            "Provisioned {} at {}",
            instance.name,
            environment.root().display()
        );
        Ok(environment)
    }
}

/// Recursively copy `src` into `dst`, skipping entries named in `skip`.
///
/// Returns the number of files copied.
pub fn copy_dir(src: &Path, dst: &Path, skip: &[&str]) -> io::Result<u64> {
    copy_dir_until(src, dst, skip, &AtomicBool::new(false))
}

/// Like [`copy_dir`], but gives up with [`io::ErrorKind::Interrupted`] once
/// `stop` is set. The flag is checked before every entry.
pub fn copy_dir_until(src: &Path, dst: &Path, skip: &[&str], stop: &AtomicBool) -> io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in std::fs::read_dir(src)? {
        if stop.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "copy stopped"));
        }

        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| skip.contains(&n)) {
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copied += copy_dir_until(&from, &to, skip, stop)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
            copied += 1;
        } else {
            std::fs::copy(&from, &to)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Raises a shared stop flag when dropped.
///
/// Hold one in the future that spawned a blocking copy: if that future is
/// dropped on timeout or cancellation, the copy stops at the next entry.
#[derive(Debug, Default)]
pub struct StopOnDrop(Arc<AtomicBool>);

impl StopOnDrop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = std::fs::read_link(from)?;
    if to.symlink_metadata().is_ok() {
        std::fs::remove_file(to)?;
    }
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::copy(from, to).map(|_| ())
}
