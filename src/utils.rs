use crate::error::{EngineError, Result};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

/// Well-known install locations, Apple Silicon first.
const DEFAULT_BREW_LOCATIONS: &[&str] = &[
    "/opt/homebrew/bin/brew",
    "/usr/local/bin/brew",
    "/home/linuxbrew/.linuxbrew/bin/brew",
];

const DEFAULT_PREFIX: &str = "/usr/local";

fn push_candidate(seen: &mut HashSet<PathBuf>, candidates: &mut Vec<PathBuf>, path: PathBuf) {
    if path.as_os_str().is_empty() {
        return;
    }
    if seen.insert(path.clone()) {
        log::debug!("Adding brew candidate: {}", path.display());
        candidates.push(path);
    }
}

fn collect_common_candidates(seen: &mut HashSet<PathBuf>, candidates: &mut Vec<PathBuf>) {
    // Priority 1: Environment variables set by `brew shellenv`
    if let Ok(brew_file) = env::var("HOMEBREW_BREW_FILE") {
        log::info!("Found HOMEBREW_BREW_FILE: {}", brew_file);
        push_candidate(seen, candidates, PathBuf::from(brew_file));
    }
    if let Ok(prefix) = env::var("HOMEBREW_PREFIX") {
        log::info!("Found HOMEBREW_PREFIX: {}", prefix);
        push_candidate(seen, candidates, PathBuf::from(prefix).join("bin").join("brew"));
    }

    // Priority 2: Whatever `brew` resolves to on PATH
    match which::which("brew") {
        Ok(path) => push_candidate(seen, candidates, path),
        Err(e) => log::debug!("brew not found on PATH: {}", e),
    }

    // Priority 3: Default prefixes
    for location in DEFAULT_BREW_LOCATIONS {
        push_candidate(seen, candidates, PathBuf::from(location));
    }
}

/// Ordered, de-duplicated list of places `brew` may live. `extras` come first.
pub fn build_candidate_list<I>(extras: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for path in extras {
        push_candidate(&mut seen, &mut candidates, path);
    }
    collect_common_candidates(&mut seen, &mut candidates);

    log::debug!("Built brew candidate list with {} paths", candidates.len());
    candidates
}

/// Locates the `brew` executable.
pub fn detect_brew_path() -> Result<PathBuf> {
    build_candidate_list(std::iter::empty())
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| {
            EngineError::Config(
                "Could not locate the brew executable. Set brewPath in settings.json.".to_string(),
            )
        })
}

/// The Homebrew prefix that owns `brew` (the directory holding `Cellar` and
/// `Caskroom`).
pub fn brew_prefix(brew: &Path) -> PathBuf {
    if let Ok(prefix) = env::var("HOMEBREW_PREFIX") {
        if !prefix.is_empty() {
            return PathBuf::from(prefix);
        }
    }
    brew.parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFIX))
}
