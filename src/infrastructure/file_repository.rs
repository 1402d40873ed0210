// Filesystem repository implementation - TOML profiles, JSON calibration records
use crate::application::profile_repository::{CalibrationRecord, ProfileRepository, StoredProfile};
use crate::domain::error::StoreError;
use crate::domain::profile::BatteryProfile;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const PROFILE_EXTENSION: &str = "toml";
const RECORD_EXTENSION: &str = "json";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone)]
pub struct FileProfileRepository {
    profiles_dir: PathBuf,
    calibrations_dir: PathBuf,
}

impl FileProfileRepository {
    pub fn new(profiles_dir: impl Into<PathBuf>, calibrations_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let repository = Self {
            profiles_dir: profiles_dir.into(),
            calibrations_dir: calibrations_dir.into(),
        };
        fs::create_dir_all(&repository.profiles_dir)?;
        fs::create_dir_all(&repository.calibrations_dir)?;
        Ok(repository)
    }

    fn profile_path(&self, record_name: &str) -> PathBuf {
        self.profiles_dir.join(format!("{record_name}.{PROFILE_EXTENSION}"))
    }

    /// `<profile>_<timestamp>`, with a numeric suffix if that name is already taken
    fn unique_record_name(&self, profile_name: &str, at: DateTime<Utc>) -> String {
        let base = format!("{}_{}", sanitize(profile_name), at.format(TIMESTAMP_FORMAT));
        if !self.profile_path(&base).exists() {
            return base;
        }
        (1..)
            .map(|n| format!("{base}-{n}"))
            .find(|name| !self.profile_path(name).exists())
            .unwrap_or(base)
    }

    fn read_profile(&self, record_name: &str) -> Result<StoredProfile, StoreError> {
        // Names come from requests; anything that could leave the store is simply absent
        if !is_record_name(record_name) {
            return Err(StoreError::ProfileNotFound(record_name.to_string()));
        }
        let path = self.profile_path(record_name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ProfileNotFound(record_name.to_string()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let profile: BatteryProfile = toml::from_str(&text).map_err(|e| StoreError::ProfileCorrupt {
            name: record_name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(StoredProfile {
            record_name: record_name.to_string(),
            profile,
        })
    }
}

impl ProfileRepository for FileProfileRepository {
    fn save(&self, profile_name: &str, profile: &BatteryProfile) -> Result<String, StoreError> {
        let text = toml::to_string(profile).map_err(|e| StoreError::ProfileCorrupt {
            name: profile_name.to_string(),
            reason: e.to_string(),
        })?;
        let record_name = self.unique_record_name(profile_name, profile.calibration_metadata.date);
        write_atomic(&self.profile_path(&record_name), text.as_bytes())?;
        tracing::info!("Saved profile record {}", record_name);
        Ok(record_name)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = fs::read_dir(&self.profiles_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(PROFILE_EXTENSION))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        // Timestamp first so profile names don't decide order, then the collision suffix numerically
        names.sort_by(|a, b| record_sort_key(a).cmp(&record_sort_key(b)).then_with(|| a.cmp(b)));
        Ok(names)
    }

    fn load(&self, record_name: &str) -> Result<StoredProfile, StoreError> {
        self.read_profile(record_name)
    }

    fn load_latest(&self, profile_name: &str) -> Result<StoredProfile, StoreError> {
        let prefix = format!("{}_", sanitize(profile_name));
        let latest = self
            .list()?
            .into_iter()
            .filter(|name| name.starts_with(&prefix) && record_timestamp(name).len() >= 16)
            .last()
            .ok_or_else(|| StoreError::ProfileNotFound(profile_name.to_string()))?;
        self.read_profile(&latest)
    }

    fn load_all(&self) -> Result<Vec<StoredProfile>, StoreError> {
        let mut profiles = Vec::new();
        for name in self.list()? {
            match self.read_profile(&name) {
                Ok(stored) => profiles.push(stored),
                Err(e) => tracing::warn!("Skipping unreadable profile record {}: {}", name, e),
            }
        }
        Ok(profiles)
    }

    fn save_calibration_record(&self, record: &CalibrationRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record).map_err(|e| StoreError::ProfileCorrupt {
            name: record.record_name.clone(),
            reason: e.to_string(),
        })?;
        let path = self
            .calibrations_dir
            .join(format!("{}.{RECORD_EXTENSION}", record.record_name));
        write_atomic(&path, &json)?;
        Ok(())
    }
}

/// Writes to a hidden temp file in the same directory, syncs, then renames into place
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let tmp_path = dir.join(format!(".{file_name}.tmp"));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    Ok(result?)
}

/// The trailing `<timestamp>[-n]` portion of a record name
fn record_timestamp(record_name: &str) -> &str {
    record_name.rsplit_once('_').map(|(_, ts)| ts).unwrap_or("")
}

/// (timestamp, collision suffix) with an unsuffixed record as suffix 0
fn record_sort_key(record_name: &str) -> (&str, u64) {
    let stamp = record_timestamp(record_name);
    match stamp.split_once('-') {
        Some((base, suffix)) => (base, suffix.parse().unwrap_or(0)),
        None => (stamp, 0),
    }
}

/// Only names `save` could have produced: sanitized profile name, `_`, timestamp
fn is_record_name(record_name: &str) -> bool {
    !record_name.is_empty()
        && record_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn sanitize(profile_name: &str) -> String {
    profile_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}
