//! Per-connection permission store.
//!
//! Each [`PermissionRecord`] pairs a `nick!user@host` pattern with an
//! optional password digest and a set of permission names. A record
//! vouches for an identity when:
//!
//! - it has no password and its mask matches the identity, or
//! - the identity successfully identified against it, in which case the
//!   identity's folded `nick!user@host` is cached on the record.
//!
//! The cache follows the identified user across nickname changes and is
//! dropped when they quit or the connection goes away, so whoever picks
//! up a vacated nickname starts with nothing.
//!
//! Every failure is a plain `false` or an empty list.

use std::collections::BTreeSet;

use slircbot_proto::{Identity, Mask};
use tracing::{debug, info};

use super::password::digests_match;
use crate::config::UserSeed;

/// One row of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRecord {
    pub mask: Mask,
    password_hash: Option<String>,
    identified: bool,
    /// Folded identity key of whoever identified against this record.
    resolved: Option<String>,
    permissions: BTreeSet<String>,
}

impl PermissionRecord {
    fn new(mask: Mask, password_hash: Option<String>) -> Self {
        Self {
            mask,
            password_hash: password_hash.filter(|h| !h.trim().is_empty()),
            identified: false,
            resolved: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Password-less records count as identified.
    pub fn is_identified(&self) -> bool {
        self.password_hash.is_none() || self.identified
    }

    pub fn permissions(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().map(String::as_str)
    }

    fn vouches_for(&self, identity: &Identity, key: &str) -> bool {
        match &self.password_hash {
            None => self.mask.matches(identity),
            Some(_) => self.identified && self.resolved.as_deref() == Some(key),
        }
    }

    fn forget(&mut self) {
        self.identified = false;
        self.resolved = None;
    }
}

/// Permission table owned by one connection.
#[derive(Debug, Clone, Default)]
pub struct AuthStore {
    /// Name of the owning connection; hooks from elsewhere are ignored.
    owner: String,
    records: Vec<PermissionRecord>,
}

impl AuthStore {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            records: Vec::new(),
        }
    }

    /// Reset the store for `owner` and load the seed records.
    pub fn initialize(&mut self, owner: &str, seeds: &[UserSeed]) {
        self.owner = owner.to_owned();
        self.records.clear();
        for seed in seeds {
            let identity = self.add_user(&seed.mask, seed.password_hash.as_deref());
            for permission in &seed.permissions {
                self.grant_permission(&identity, permission);
            }
        }
        debug!(connection = %self.owner, records = self.records.len(), "permission store initialised");
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Add a record for `mask` unless an identical pattern exists. Returns
    /// the pattern as an identity, usable with the grant/revoke calls.
    pub fn add_user(&mut self, mask: &str, password_hash: Option<&str>) -> Identity {
        let mask = Mask::parse(mask);
        let identity = mask.to_identity();
        if !self.records.iter().any(|r| r.mask.same_as(&mask)) {
            self.records
                .push(PermissionRecord::new(mask, password_hash.map(str::to_owned)));
        }
        identity
    }

    /// Whether a record with exactly this pattern exists.
    pub fn is_user_known(&self, mask: &str) -> bool {
        let mask = Mask::parse(mask);
        self.records.iter().any(|r| r.mask.same_as(&mask))
    }

    /// Record addressed by an administrative call: the exact pattern, else
    /// the record this identity identified against, else the first match.
    fn record_mut(&mut self, identity: &Identity) -> Option<&mut PermissionRecord> {
        let pattern = Mask::of(identity);
        let key = identity.key();
        let index = self
            .records
            .iter()
            .position(|r| r.mask.same_as(&pattern))
            .or_else(|| {
                self.records
                    .iter()
                    .position(|r| r.resolved.as_deref() == Some(key.as_str()))
            })
            .or_else(|| self.records.iter().position(|r| r.mask.matches(identity)))?;
        self.records.get_mut(index)
    }

    /// The record currently vouching for `identity`, if any.
    fn trusted(&self, identity: &Identity) -> Option<&PermissionRecord> {
        let key = identity.key();
        self.records.iter().find(|r| r.has_password() && r.vouches_for(identity, &key)).or_else(|| {
            self.records
                .iter()
                .find(|r| !r.has_password() && r.vouches_for(identity, &key))
        })
    }

    /// `false` if the permission was already granted or the user is unknown.
    pub fn grant_permission(&mut self, identity: &Identity, permission: &str) -> bool {
        self.record_mut(identity)
            .is_some_and(|r| r.permissions.insert(permission.to_owned()))
    }

    /// `false` if the permission was not granted or the user is unknown.
    pub fn revoke_permission(&mut self, identity: &Identity, permission: &str) -> bool {
        self.record_mut(identity)
            .is_some_and(|r| r.permissions.remove(permission))
    }

    /// Whether `identity` is vouched for and holds `permission`.
    pub fn has_permission(&self, identity: &Identity, permission: &str) -> bool {
        self.trusted(identity)
            .is_some_and(|r| r.permissions.contains(permission))
    }

    /// Permissions currently effective for `identity`.
    pub fn get_permission_list(&self, identity: &Identity) -> Vec<String> {
        self.trusted(identity)
            .map(|r| r.permissions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check a password digest against the records matching `identity`.
    pub fn identify_user(&mut self, identity: &Identity, hashed_secret: &str) -> bool {
        let Some(index) = self.records.iter().position(|r| {
            r.mask.matches(identity)
                && r.password_hash
                    .as_deref()
                    .is_some_and(|stored| digests_match(stored, hashed_secret))
        }) else {
            debug!(connection = %self.owner, "identification failed");
            return false;
        };

        let key = identity.key();
        for record in &mut self.records {
            if record.resolved.as_deref() == Some(key.as_str()) {
                record.forget();
            }
        }
        let record = &mut self.records[index];
        record.identified = true;
        record.resolved = Some(key);
        info!(connection = %self.owner, user = %identity, mask = %record.mask, "user identified");
        true
    }

    /// Drop any identification held by `identity`.
    pub fn logout(&mut self, identity: &Identity) -> bool {
        let key = identity.key();
        let mut found = false;
        for record in &mut self.records {
            if record.resolved.as_deref() == Some(key.as_str()) {
                record.forget();
                found = true;
            }
        }
        found
    }

    /// Follow an identified user to their new nickname.
    pub fn on_change_nick(&mut self, origin: &str, old: &Identity, new_nickname: &str) {
        if origin != self.owner {
            return;
        }
        let old_key = old.key();
        let new_key = old.renamed(new_nickname).key();
        for record in &mut self.records {
            if record.resolved.as_deref() == Some(old_key.as_str()) {
                record.resolved = Some(new_key.clone());
            }
        }
    }

    /// Forget a user who left the network.
    pub fn on_quit(&mut self, origin: &str, identity: &Identity) {
        if origin != self.owner {
            return;
        }
        if self.logout(identity) {
            debug!(connection = %self.owner, user = %identity, "identification cleared on quit");
        }
    }

    /// The connection lost its session; nobody stays identified.
    pub fn on_disconnect(&mut self) {
        for record in &mut self.records {
            record.forget();
        }
    }

    pub fn records(&self) -> &[PermissionRecord] {
        &self.records
    }

    /// Patterns of every record, in insertion order.
    pub fn users(&self) -> Vec<String> {
        self.records.iter().map(|r| r.mask.to_string()).collect()
    }

    /// Permissions granted to the record with exactly this pattern,
    /// whether or not anyone is identified against it.
    pub fn permissions_of(&self, mask: &str) -> Vec<String> {
        let mask = Mask::parse(mask);
        self.records
            .iter()
            .find(|r| r.mask.same_as(&mask))
            .map(|r| r.permissions.iter().cloned().collect())
            .unwrap_or_default()
    }
}
