use crate::error::StoreError;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Length of a normalized tag id (4 UID bytes as hex).
pub const UID_LEN: usize = 8;

/// Canonical form of a scanned tag id: separators stripped, uppercase, first
/// [`UID_LEN`] hex digits. Returns `None` for ids shorter than that or with
/// non-hex characters, so a partial scan never matches.
pub fn normalize_uid(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ':' | '-' | '.'))
        .take(UID_LEN)
        .collect::<String>()
        .to_ascii_uppercase();

    if cleaned.len() != UID_LEN || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        None
    } else {
        Some(cleaned)
    }
}

/// Static mapping of normalized tag id to username, fixed at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserDirectory {
    users: BTreeMap<String, String>,
}

impl UserDirectory {
    /// Builds a directory from raw ids; entries whose id does not normalize are skipped.
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let users = entries
            .into_iter()
            .filter_map(|(uid, name)| normalize_uid(uid.as_ref()).map(|uid| (uid, name.into())))
            .collect();
        Self { users }
    }

    /// Loads `uid,username` rows from a CSV file. A leading `uid,username`
    /// header line is optional.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(path)?;
        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            if line == 0 && record.get(0).is_some_and(|f| f.eq_ignore_ascii_case("uid")) {
                continue;
            }
            let (uid, username): (String, String) = record.deserialize(None)?;
            rows.push((uid, username));
        }
        Ok(Self::new(rows))
    }

    pub fn lookup(&self, raw_uid: &str) -> Option<&str> {
        normalize_uid(raw_uid).and_then(|uid| self.users.get(&uid).map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Holds at most one authenticated user.
#[derive(Debug, Clone, Default)]
pub struct RfidSession {
    directory: UserDirectory,
    current_user: Option<String>,
}

impl RfidSession {
    pub fn new(directory: UserDirectory) -> Self {
        Self {
            directory,
            current_user: None,
        }
    }

    /// A successful scan replaces whoever was logged in. An unknown tag leaves
    /// the session untouched.
    pub fn login(&mut self, raw_uid: &str) -> Option<String> {
        match self.directory.lookup(raw_uid) {
            Some(username) => {
                let username = username.to_string();
                if let Some(previous) = self.current_user.replace(username.clone()) {
                    if previous != username {
                        info!(%previous, %username, "rfid session replaced");
                    }
                }
                info!(%username, "user logged in");
                Some(username)
            }
            None => {
                debug!(uid = %raw_uid, "unknown rfid tag");
                None
            }
        }
    }

    pub fn logout(&mut self) {
        if let Some(username) = self.current_user.take() {
            info!(%username, "user logged out");
        }
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }
}
