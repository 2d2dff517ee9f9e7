//! Removable-Storage Locator
//!
//! Checks the platform's usual removable-media roots and returns the first
//! candidate that is mounted and accepts a write. When nothing qualifies, the
//! error says which stage every candidate failed at.

use crate::config::StorageConfig;
use crate::types::Platform;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Why no storage was located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocateFailure {
    /// Candidates exist but none is a mount point
    NotMounted,
    /// Mounted candidates exist but none accepts a write
    NotWritable,
    /// No candidate directory at all
    NoCandidates,
}

impl LocateFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocateFailure::NotMounted => "not-mounted",
            LocateFailure::NotWritable => "not-writable",
            LocateFailure::NoCandidates => "no-candidates",
        }
    }
}

impl fmt::Display for LocateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct LocateError {
    pub reason: LocateFailure,
    pub detail: String,
}

impl LocateError {
    fn new(reason: LocateFailure, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// How a candidate is confirmed to be a mount point
#[derive(Debug, Clone)]
pub enum MountCheck {
    /// Compare with the kernel mount table (`/proc/mounts`)
    ProcMounts,
    /// Compare with a fixed set of mount points
    Table(HashSet<PathBuf>),
    /// Every existing directory counts as mounted
    Skip,
}

/// Finds the first writable removable volume
#[derive(Debug, Clone)]
pub struct StorageLocator {
    roots: Vec<PathBuf>,
    platform: Platform,
    mount_check: MountCheck,
}

impl StorageLocator {
    /// Locator for the running platform's default roots
    pub fn new() -> Self {
        let platform = Platform::current();
        Self {
            roots: default_roots(platform),
            platform,
            mount_check: default_mount_check(platform),
        }
    }

    /// Configured roots replace the defaults when present
    pub fn from_config(config: &StorageConfig) -> Self {
        let locator = Self::new();
        if config.mount_roots.is_empty() {
            locator
        } else {
            locator.with_roots(config.mount_roots.clone())
        }
    }

    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = roots;
        self
    }

    pub fn with_mount_check(mut self, check: MountCheck) -> Self {
        self.mount_check = check;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Return the first mounted, writable candidate.
    pub fn locate(&self) -> Result<PathBuf, LocateError> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            log::info!("No removable storage candidates under {:?}", self.roots);
            return Err(LocateError::new(
                LocateFailure::NoCandidates,
                format!("Nothing found under {}", display_roots(&self.roots)),
            ));
        }

        let mounts = match &self.mount_check {
            MountCheck::ProcMounts => Some(read_mount_table()),
            MountCheck::Table(table) => Some(table.clone()),
            MountCheck::Skip => None,
        };

        let mounted: Vec<&PathBuf> = candidates
            .iter()
            .filter(|candidate| {
                mounts
                    .as_ref()
                    .map_or(true, |table| table.contains(candidate.as_path()))
            })
            .collect();

        if mounted.is_empty() {
            return Err(LocateError::new(
                LocateFailure::NotMounted,
                format!(
                    "{} candidate(s), none mounted: {}",
                    candidates.len(),
                    display_roots(&candidates)
                ),
            ));
        }

        let mut failures = Vec::new();
        for candidate in mounted {
            match check_writable(candidate) {
                Ok(()) => {
                    log::info!("Removable storage located at {}", candidate.display());
                    return Ok(candidate.clone());
                }
                Err(e) => {
                    log::debug!("{} not writable: {}", candidate.display(), e);
                    failures.push(format!("{} ({})", candidate.display(), e));
                }
            }
        }

        Err(LocateError::new(
            LocateFailure::NotWritable,
            failures.join("; "),
        ))
    }

    /// Candidate directories in search order
    pub fn candidates(&self) -> Vec<PathBuf> {
        match self.platform {
            Platform::Windows if self.roots.iter().all(|r| is_drive_root(r)) => self
                .roots
                .iter()
                .filter(|root| root.is_dir())
                .cloned()
                .collect(),
            _ => {
                let mut found = Vec::new();
                for root in &self.roots {
                    for child in subdirectories(root) {
                        // Some systems mount straight at /media/<label>
                        found.push(child.clone());
                        found.extend(subdirectories(&child));
                    }
                }
                found
            }
        }
    }
}

impl Default for StorageLocator {
    fn default() -> Self {
        Self::new()
    }
}

fn default_roots(platform: Platform) -> Vec<PathBuf> {
    match platform {
        Platform::Linux => vec![PathBuf::from("/media"), PathBuf::from("/run/media")],
        Platform::MacOS => vec![PathBuf::from("/Volumes")],
        Platform::Windows => ('D'..='Z')
            .map(|letter| PathBuf::from(format!("{}:\\", letter)))
            .collect(),
        Platform::Unknown => Vec::new(),
    }
}

fn default_mount_check(platform: Platform) -> MountCheck {
    match platform {
        Platform::Linux => MountCheck::ProcMounts,
        _ => MountCheck::Skip,
    }
}

fn is_drive_root(path: &Path) -> bool {
    let text = path.to_string_lossy();
    let bytes = text.as_bytes();
    bytes.len() >= 2 && bytes.len() <= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Names that belong to the host rather than to a removable volume
pub fn is_system_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    ["system", "boot", "root", "efi"]
        .iter()
        .any(|keyword| lower.contains(keyword))
}

fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            // Symlinks (macOS boot volume alias) are not removable media
            entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
        })
        .filter(|entry| !is_system_name(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    dirs
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    let scratch = dir.join(format!(".boothcam-write-{}", uuid::Uuid::new_v4()));
    fs::write(&scratch, b"boothcam")?;
    fs::remove_file(&scratch)
}

fn read_mount_table() -> HashSet<PathBuf> {
    match fs::read_to_string("/proc/mounts") {
        Ok(table) => parse_mount_table(&table),
        Err(e) => {
            log::debug!("Cannot read /proc/mounts: {}", e);
            HashSet::new()
        }
    }
}

/// Mount points listed in a `/proc/mounts`-format table
pub fn parse_mount_table(table: &str) -> HashSet<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_mount_field(field)))
        .collect()
}

/// Undo the kernel's octal escaping (`\040` for space and friends)
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn display_roots(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
