//! Per-resource switches resolved once from [`Config`](crate::config::Config).

use std::collections::HashSet;
use std::time::Duration;

/// Entry in `ENCRYPT_RESOURCES` that enables every resource.
const WILDCARD: &str = "*";

/// Which resources have their request bodies enveloped.
#[derive(Debug, Clone, Default)]
pub struct EncryptionFlags {
    all: bool,
    resources: HashSet<String>,
}

impl EncryptionFlags {
    /// Parse a comma-separated resource list. Entries are trimmed and
    /// lower-cased; empty entries are ignored.
    pub fn from_csv(csv: &str) -> Self {
        let mut resources = parse_csv(csv);
        let all = resources.remove(WILDCARD);
        Self { all, resources }
    }

    /// Returns `true` if request bodies for `resource` must be encrypted.
    pub fn should_encrypt(&self, resource: &str) -> bool {
        self.all || self.resources.contains(&resource.to_ascii_lowercase())
    }

    /// Returns `true` if the `*` wildcard was given.
    pub fn encrypts_all(&self) -> bool {
        self.all
    }

    /// Number of explicitly listed resources, not counting the wildcard.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns `true` if no resource is listed and the wildcard is absent.
    pub fn is_empty(&self) -> bool {
        !self.all && self.resources.is_empty()
    }
}

/// Backend deadlines by resource.
#[derive(Debug, Clone)]
pub struct DeadlinePolicy {
    default: Duration,
    bulk: Duration,
    bulk_resources: HashSet<String>,
}

impl DeadlinePolicy {
    /// Build a policy where `bulk_csv` resources get `bulk` and all others
    /// get `default`.
    pub fn new(default: Duration, bulk: Duration, bulk_csv: &str) -> Self {
        Self {
            default,
            bulk,
            bulk_resources: parse_csv(bulk_csv),
        }
    }

    /// Deadline for one backend call on `resource`.
    pub fn deadline_for(&self, resource: &str) -> Duration {
        if self.bulk_resources.contains(&resource.to_ascii_lowercase()) {
            self.bulk
        } else {
            self.default
        }
    }

    /// Longest deadline any call may be given.
    pub fn longest(&self) -> Duration {
        self.default.max(self.bulk)
    }
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(120), "")
    }
}

fn parse_csv(csv: &str) -> HashSet<String> {
    csv.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
