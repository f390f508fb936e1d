//! Read-only username → password directory, loaded once at startup.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::DirectoryError;

/// A single known user.
///
/// `password` is `None` for users that exist but have no retrievable secret.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialRecord {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    users: Vec<CredentialRecord>,
}

/// Immutable lookup table of [`CredentialRecord`]s keyed by username.
#[derive(Debug, Clone, Default)]
pub struct CredentialDirectory {
    records: HashMap<String, CredentialRecord>,
}

impl CredentialDirectory {
    /// Builds a directory from records, rejecting duplicate usernames.
    pub fn from_records(
        records: impl IntoIterator<Item = CredentialRecord>,
    ) -> Result<Self, DirectoryError> {
        let mut map = HashMap::new();
        for record in records {
            if map.contains_key(&record.username) {
                return Err(DirectoryError::DuplicateUser(record.username));
            }
            map.insert(record.username.clone(), record);
        }
        Ok(Self { records: map })
    }

    /// Parses a TOML document with a `[[users]]` array.
    pub fn from_toml_str(content: &str) -> Result<Self, DirectoryError> {
        let file: CredentialFile =
            toml::from_str(content).map_err(|e| DirectoryError::Parse(e.to_string()))?;
        Self::from_records(file.users)
    }

    /// Parses a JSON document of the form `{"users": [...]}`.
    pub fn from_json_str(content: &str) -> Result<Self, DirectoryError> {
        let file: CredentialFile =
            serde_json::from_str(content).map_err(|e| DirectoryError::Parse(e.to_string()))?;
        Self::from_records(file.users)
    }

    /// Loads the directory from `path`. Files ending in `.json` are parsed as
    /// JSON, everything else as TOML.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::Io`] if the file cannot be read.
    /// - [`DirectoryError::Parse`] if the content is malformed.
    /// - [`DirectoryError::DuplicateUser`] if a username repeats.
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let content = std::fs::read_to_string(path).map_err(|source| DirectoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let directory = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        tracing::info!(
            "Loaded {} credential record(s) from {}",
            directory.len(),
            path.display()
        );
        Ok(directory)
    }

    pub fn get(&self, username: &str) -> Option<&CredentialRecord> {
        self.records.get(username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.records.contains_key(username)
    }

    /// Returns the password for `username`, if the user exists and has one.
    pub fn password(&self, username: &str) -> Option<&str> {
        self.records.get(username)?.password.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
