//! Persona prompts stored as `<dir>/<name>.txt`.
//!
//! Profiles are re-read on every turn so edits to a persona file take effect
//! without a restart.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Returned in place of a persona that could not be loaded.
pub const PROFILE_PLACEHOLDER: &str = "Profile not found. Please ensure the profile name is correct.";

static PROFILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("profile name pattern is valid"));

/// Whether `name` is usable as a profile name (no separators, no dots).
pub fn is_valid_profile_name(name: &str) -> bool {
    PROFILE_NAME.is_match(name)
}

#[derive(Debug)]
pub enum ProfileError {
    InvalidName(String),
    NotFound(PathBuf),
    Read { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid profile name '{name}'"),
            Self::NotFound(path) => write!(f, "profile not found at '{}'", path.display()),
            Self::Read { path, source } => {
                write!(f, "failed to read profile '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ProfileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub struct ProfileLoader {
    dir: PathBuf,
}

impl ProfileLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn try_load(&self, name: &str) -> Result<String, ProfileError> {
        if !is_valid_profile_name(name) {
            return Err(ProfileError::InvalidName(name.to_string()));
        }

        let path = self.dir.join(format!("{name}.txt"));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ProfileError::NotFound(path)),
            Err(e) => Err(ProfileError::Read { path, source: e }),
        }
    }

    /// Persona text for `name`, or [`PROFILE_PLACEHOLDER`] if it can't be read.
    pub async fn load(&self, name: &str) -> String {
        match self.try_load(name).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Using placeholder persona: {e}");
                PROFILE_PLACEHOLDER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profiles_with(name: &str, text: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(format!("{name}.txt")), text).unwrap();
        dir
    }

    #[test]
    fn test_profile_names() {
        assert!(is_valid_profile_name("anya5"));
        assert!(is_valid_profile_name("grumpy-cat_2"));
        assert!(!is_valid_profile_name(""));
        assert!(!is_valid_profile_name("../secrets"));
        assert!(!is_valid_profile_name("a/b"));
        assert!(!is_valid_profile_name("anya.txt"));
    }

    #[tokio::test]
    async fn test_load_existing_profile() {
        let dir = profiles_with("anya5", "You are Anya.\n");
        let loader = ProfileLoader::new(dir.path());
        assert_eq!(loader.load("anya5").await, "You are Anya.\n");
    }

    #[tokio::test]
    async fn test_missing_profile_falls_back() {
        let dir = TempDir::new().unwrap();
        let loader = ProfileLoader::new(dir.path());

        assert!(matches!(loader.try_load("ghost").await, Err(ProfileError::NotFound(_))));
        assert_eq!(loader.load("ghost").await, PROFILE_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_invalid_name_never_touches_disk() {
        let dir = profiles_with("secret", "nope");
        let nested = dir.path().join("profiles");
        std::fs::create_dir(&nested).unwrap();
        let loader = ProfileLoader::new(&nested);

        let err = loader.try_load("../secret").await.unwrap_err();
        assert!(matches!(err, ProfileError::InvalidName(_)));
        assert_eq!(loader.load("../secret").await, PROFILE_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_edits_are_picked_up() {
        let dir = profiles_with("p", "first");
        let loader = ProfileLoader::new(dir.path());
        assert_eq!(loader.load("p").await, "first");

        std::fs::write(dir.path().join("p.txt"), "second").unwrap();
        assert_eq!(loader.load("p").await, "second");
    }
}
