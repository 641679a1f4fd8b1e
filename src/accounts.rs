//! Account registry (`accounts.toml`), resolved once at startup.
//!
//! Without a registry the data directory itself is the single legacy
//! account, matching the layout older versions used.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::errors::{AppError, AppResult};
use crate::state::LEGACY_MARKER_FILE;
use crate::types::Account;

pub const REGISTRY_FILE: &str = "accounts.toml";
pub const LEGACY_ACCOUNT_ID: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    accounts: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub email: String,
    /// Seed this account from the legacy timestamp marker on its first run.
    #[serde(default)]
    pub legacy: bool,
}

#[derive(Debug, Clone)]
pub struct AccountRegistry {
    data_dir: PathBuf,
    /// None when no registry file exists.
    entries: Option<Vec<RegistryEntry>>,
}

impl AccountRegistry {
    pub fn load(data_dir: &Path) -> AppResult<Self> {
        let path = data_dir.join(REGISTRY_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => {
                let parsed: RegistryFile = toml::from_str(&raw)
                    .map_err(|e| AppError::Config(format!("parsing {}: {e}", path.display())))?;
                Some(parsed.accounts)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(AppError::Config(format!("reading {}: {e}", path.display()))),
        };
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            entries,
        })
    }

    pub fn has_registry(&self) -> bool {
        self.entries.is_some()
    }

    pub fn account_dir(&self, email: &str) -> PathBuf {
        self.data_dir.join("accounts").join(email)
    }

    /// Every account a plain run would sync.
    pub fn accounts(&self) -> Vec<Account> {
        match &self.entries {
            Some(entries) => entries
                .iter()
                .map(|e| Account {
                    id: e.email.clone(),
                    dir: self.account_dir(&e.email),
                    legacy: e.legacy,
                })
                .collect(),
            None => vec![Account {
                id: LEGACY_ACCOUNT_ID.to_string(),
                dir: self.data_dir.clone(),
                legacy: true,
            }],
        }
    }

    /// Accounts for this run: all of them, or exactly the `selected` ones.
    pub fn resolve(&self, selected: &[String]) -> AppResult<Vec<Account>> {
        let all = self.accounts();
        if selected.is_empty() {
            return Ok(all);
        }
        if !self.has_registry() {
            return Err(AppError::Config(format!(
                "--account needs {REGISTRY_FILE}; add one with --add-account"
            )));
        }
        selected
            .iter()
            .map(|wanted| {
                all.iter()
                    .find(|a| a.id.eq_ignore_ascii_case(wanted))
                    .cloned()
                    .ok_or_else(|| AppError::Config(format!("unknown account {wanted}")))
            })
            .collect()
    }

    /// Register `email`, returning its account. Re-adding an existing
    /// address is a no-op. The first account added next to a legacy marker
    /// inherits it.
    pub fn add(&mut self, email: &str) -> AppResult<Account> {
        let creating = self.entries.is_none();
        let inherit_legacy = creating && self.data_dir.join(LEGACY_MARKER_FILE).exists();
        let entries = self.entries.get_or_insert_with(Vec::new);

        if !entries.iter().any(|e| e.email.eq_ignore_ascii_case(email)) {
            entries.push(RegistryEntry {
                email: email.to_string(),
                legacy: inherit_legacy,
            });
            self.save()?;
        }

        self.accounts()
            .into_iter()
            .find(|a| a.id.eq_ignore_ascii_case(email))
            .ok_or_else(|| AppError::Unexpected(format!("account {email} missing after add")))
    }

    fn save(&self) -> AppResult<()> {
        let file = RegistryFile {
            accounts: self.entries.clone().unwrap_or_default(),
        };
        let serialized = toml::to_string_pretty(&file)
            .map_err(|e| AppError::Unexpected(format!("encoding registry: {e}")))?;

        fs::create_dir_all(&self.data_dir)
            .map_err(|e| AppError::Unexpected(format!("creating {}: {e}", self.data_dir.display())))?;
        let mut tmp = NamedTempFile::new_in(&self.data_dir)
            .map_err(|e| AppError::Unexpected(format!("creating temp registry: {e}")))?;
        tmp.write_all(serialized.as_bytes())
            .map_err(|e| AppError::Unexpected(format!("writing temp registry: {e}")))?;
        tmp.persist(self.data_dir.join(REGISTRY_FILE))
            .map_err(|e| AppError::Unexpected(format!("replacing registry: {}", e.error)))?;
        Ok(())
    }
}
