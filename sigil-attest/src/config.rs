use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sigil_author::ChallengeForm;
use sigil_core::error::Result;
use sigil_core::store::home_dir;

use crate::cache::DEFAULT_PROTOCOL_VERSION;

const CONFIG_FILE: &str = "config.json";

/// Verifier settings. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Enforce the authenticator's rpId hash when set.
    pub rp_id: Option<String>,
    pub protocol_version: String,
    pub vkey_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub prompt_timeout_secs: u64,
    /// Also accept author signatures over `SHA256("KAS-1|bundleHash|" + hash)`.
    pub accept_domain_challenge: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            rp_id: None,
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            vkey_path: None,
            cache_dir: None,
            prompt_timeout_secs: 60,
            accept_domain_challenge: false,
        }
    }
}

impl VerifierConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// `~/.sigil/config.json`
    pub fn default_path() -> Result<PathBuf> {
        Ok(home_dir()?.join(".sigil").join(CONFIG_FILE))
    }

    /// An explicit path must exist; the default path is optional.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }
        match Self::default_path() {
            Ok(p) if p.exists() => {
                tracing::debug!(path = %p.display(), "loading verifier config");
                Self::load(&p)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn challenge_form(&self) -> ChallengeForm {
        if self.accept_domain_challenge {
            ChallengeForm::Either
        } else {
            ChallengeForm::BundleHash
        }
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
}
