//! Provider fetcher: resolves a provider's `{source, version}` reference to
//! a local filesystem directory containing `provider.yaml` (spec §4.3).
//!
//! The core treats this as a black box collaborator — see
//! [`ProviderFetcher`] — injected at construction rather than hardwired.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{Result, ThinCiError};
use crate::intent::ProviderRef;

/// True when `source` names a remote locator the fetcher must clone/update,
/// per the pattern list in spec §4.3.
pub fn is_remote_source(source: &str) -> bool {
    let s = source.trim();
    if s.is_empty() {
        return false;
    }
    s.starts_with("github.com/")
        || s.starts_with("gitlab.com/")
        || s.starts_with("bitbucket.org/")
        || s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("git@")
}

/// Resolves a `{source, version}` reference to a directory containing
/// `provider.yaml`.
pub trait ProviderFetcher: Send + Sync {
    fn fetch(&self, provider_name: &str, reference: &ProviderRef, repo_root: &Path)
    -> Result<PathBuf>;
}

fn require_provider_yaml(dir: &Path) -> Result<PathBuf> {
    if dir.join("provider.yaml").is_file() {
        Ok(dir.to_path_buf())
    } else {
        Err(ThinCiError::ProviderUnavailable {
            name: dir.display().to_string(),
            available: Vec::new(),
        })
    }
}

/// Resolves local sources: empty source falls back to the
/// `providers/<name>` convention under `repo_root`; a relative/absolute
/// source is the directory itself.
#[derive(Debug, Default)]
pub struct LocalFetcher;

impl ProviderFetcher for LocalFetcher {
    fn fetch(
        &self,
        provider_name: &str,
        reference: &ProviderRef,
        repo_root: &Path,
    ) -> Result<PathBuf> {
        let source = reference.source.trim();
        let dir = if source.is_empty() {
            repo_root.join("providers").join(provider_name)
        } else {
            let candidate = Path::new(source);
            if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                repo_root.join(candidate)
            }
        };
        require_provider_yaml(&dir).map_err(|_| {
            ThinCiError::ProviderUnavailable {
                name: provider_name.to_string(),
                available: Vec::new(),
            }
        })
    }
}

/// Runs `git` subprocesses. A trait so tests can inject a double without
/// touching the network.
pub trait GitCommandRunner: Send + Sync {
    fn clone_repo(&self, source: &str, dest: &Path) -> Result<()>;
    fn fast_forward(&self, dest: &Path) -> Result<()>;
}

pub struct SystemGitRunner;

impl GitCommandRunner for SystemGitRunner {
    fn clone_repo(&self, source: &str, dest: &Path) -> Result<()> {
        let url = normalize_clone_url(source);
        let output = Command::new("git")
            .args(["clone", "--depth", "1", &url])
            .arg(dest)
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if dest.is_dir() && dest.join(".git").is_dir() {
                // Another process won the race and already cloned here;
                // tolerate it (spec §5: second writer proceeds with
                // whatever the directory now contains).
                debug!("clone destination already populated, proceeding: {}", dest.display());
                Ok(())
            } else {
                Err(ThinCiError::ProviderUnavailable {
                    name: source.to_string(),
                    available: vec![format!("git clone failed: {stderr}")],
                })
            }
        }
    }

    fn fast_forward(&self, dest: &Path) -> Result<()> {
        let output = Command::new("git")
            .args(["-C"])
            .arg(dest)
            .args(["pull", "--ff-only"])
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("provider cache fast-forward update failed for {}: {}", dest.display(), stderr);
        }
        Ok(())
    }
}

/// `github.com/org/repo` style sources need an explicit scheme for `git
/// clone`; fully-qualified URLs and `git@` sources pass through unchanged.
fn normalize_clone_url(source: &str) -> String {
    if source.starts_with("github.com/")
        || source.starts_with("gitlab.com/")
        || source.starts_with("bitbucket.org/")
    {
        format!("https://{source}")
    } else {
        source.to_string()
    }
}

/// Resolves remote sources into a process-level cache directory, cloning on
/// a miss and attempting a fast-forward update on a hit (spec §4.3, §5).
pub struct GitFetcher {
    cache_root: PathBuf,
    runner: Box<dyn GitCommandRunner>,
}

impl GitFetcher {
    pub fn new(cache_root: PathBuf) -> Self {
        Self { cache_root, runner: Box::new(SystemGitRunner) }
    }

    pub fn with_runner(cache_root: PathBuf, runner: Box<dyn GitCommandRunner>) -> Self {
        Self { cache_root, runner }
    }

    /// Default cache root: `<home>/.sourceplane/providers` (spec §4.3, §6),
    /// resolved once at construction rather than read deep in the call
    /// graph (spec §9 Design Note).
    pub fn default_cache_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sourceplane")
            .join("providers")
    }
}

impl ProviderFetcher for GitFetcher {
    fn fetch(
        &self,
        provider_name: &str,
        reference: &ProviderRef,
        _repo_root: &Path,
    ) -> Result<PathBuf> {
        if !reference.version.trim().is_empty() {
            match semver::VersionReq::parse(reference.version.trim()) {
                Ok(req) => debug!(
                    "provider '{}' requests version constraint '{}'; accepted but not enforced against the fetched ref (spec §9 open question)",
                    provider_name, req
                ),
                Err(_) => debug!(
                    "provider '{}' requests non-semver version string '{}'; carried through unenforced",
                    provider_name, reference.version
                ),
            }
        }

        let dest = self.cache_root.join(provider_name);
        if dest.is_dir() {
            self.runner.fast_forward(&dest)?;
        } else {
            std::fs::create_dir_all(&self.cache_root)?;
            self.runner.clone_repo(&reference.source, &dest)?;
        }

        require_provider_yaml(&dest)
    }
}

/// Chooses [`LocalFetcher`] or [`GitFetcher`] based on the reference's
/// source, so a registry loader can fetch a mixed set of providers without
/// branching itself.
pub fn fetch_provider_dir(
    provider_name: &str,
    reference: &ProviderRef,
    repo_root: &Path,
    git: &dyn ProviderFetcher,
) -> Result<PathBuf> {
    if is_remote_source(&reference.source) {
        git.fetch(provider_name, reference, repo_root)
    } else {
        LocalFetcher.fetch(provider_name, reference, repo_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn classifies_remote_sources() {
        assert!(is_remote_source("github.com/acme/terraform-provider"));
        assert!(is_remote_source("https://example.com/repo.git"));
        assert!(is_remote_source("git@github.com:acme/repo.git"));
        assert!(!is_remote_source(""));
        assert!(!is_remote_source("./local/path"));
        assert!(!is_remote_source("/abs/path"));
    }

    #[test]
    fn local_fetcher_resolves_by_convention_when_source_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let provider_dir = tmp.path().join("providers").join("terraform");
        std::fs::create_dir_all(&provider_dir).unwrap();
        std::fs::write(provider_dir.join("provider.yaml"), "name: terraform\n").unwrap();

        let reference = ProviderRef {
            source: String::new(),
            version: String::new(),
            defaults: serde_json::Value::Null,
        };
        let resolved = LocalFetcher.fetch("terraform", &reference, tmp.path()).unwrap();
        assert_eq!(resolved, provider_dir);
    }

    #[test]
    fn local_fetcher_fails_without_provider_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = ProviderRef {
            source: String::new(),
            version: String::new(),
            defaults: serde_json::Value::Null,
        };
        let err = LocalFetcher.fetch("terraform", &reference, tmp.path()).unwrap_err();
        assert!(matches!(err, ThinCiError::ProviderUnavailable { .. }));
    }

    struct FakeGitRunner {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl GitCommandRunner for FakeGitRunner {
        fn clone_repo(&self, source: &str, dest: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(format!("clone:{source}"));
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("provider.yaml"), "name: terraform\n")?;
            Ok(())
        }

        fn fast_forward(&self, dest: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(format!("pull:{}", dest.display()));
            Ok(())
        }
    }

    #[test]
    fn git_fetcher_clones_on_cache_miss_and_pulls_on_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fetcher = GitFetcher::with_runner(
            tmp.path().join("cache"),
            Box::new(FakeGitRunner { calls: calls.clone() }),
        );
        let reference = ProviderRef {
            source: "github.com/acme/terraform-provider".to_string(),
            version: "1.0.0".to_string(),
            defaults: serde_json::Value::Null,
        };

        let resolved = fetcher.fetch("terraform", &reference, tmp.path()).unwrap();
        assert!(resolved.join("provider.yaml").is_file());
        assert_eq!(calls.lock().unwrap().len(), 1);

        fetcher.fetch("terraform", &reference, tmp.path()).unwrap();
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert!(calls.lock().unwrap()[1].starts_with("pull:"));
    }

    #[test]
    fn normalizes_github_style_source_with_https_scheme() {
        assert_eq!(
            normalize_clone_url("github.com/acme/repo"),
            "https://github.com/acme/repo"
        );
        assert_eq!(normalize_clone_url("git@github.com:acme/repo.git"), "git@github.com:acme/repo.git");
    }
}
