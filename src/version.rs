use std::fmt;

use serde::Serialize;

/// Identity of the running build. Built once at start-up and handed to
/// whatever needs to report it.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub commit: Option<String>,
}

impl BuildInfo {
    pub fn new(version: impl Into<String>, commit: Option<String>) -> Self {
        Self {
            version: version.into(),
            commit,
        }
    }

    /// Version from the package manifest, commit from `DOCBASE_GIT_SHA` if it
    /// was set at compile time
    pub fn from_build_env() -> Self {
        Self::new(
            env!("CARGO_PKG_VERSION"),
            option_env!("DOCBASE_GIT_SHA").map(str::to_string),
        )
    }

    /// Version plus commit when known, as printed by `--version`
    pub fn long_version(&self) -> String {
        match &self.commit {
            Some(commit) => format!("{} ({commit})", self.version),
            None => self.version.clone(),
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "docbase {}", self.long_version())
    }
}
