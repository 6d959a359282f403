//! The user/group data model. Field set matches the spec's data model
//! section; nothing here is backend-specific, so both the in-memory ACL
//! resolver and the `sled`-backed store share these types verbatim.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A single IP-mask entry of the form `ident@host-glob`, e.g. `*@1.2.3.*`.
///
/// Parsing is intentionally not done here (that lives in `shadowftp-vfs`'s
/// `ipmask` module, which also owns the matcher); this is a plain data
/// holder so `User` stays storage-format agnostic.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IpMask(pub String);

impl IpMask {
    /// Splits into the raw `(ident, host)` halves on the first `@`.
    pub fn parts(&self) -> Option<(&str, &str)> {
        self.0.split_once('@')
    }
}

impl std::fmt::Display for IpMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A group this user belongs to, with the admin bit that `gadmin` ACL
/// tokens key off.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GroupMembership {
    /// Lowercase group name.
    pub group: String,
    /// Whether this user administers the group (can add/remove members).
    pub is_admin: bool,
}

/// A registered user. Names are always stored and compared lowercase.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    /// Lowercase login name.
    pub name: String,
    /// PHC-formatted adaptive password hash (argon2id in this implementation).
    pub password_hash: String,
    /// Primary group name, or `None` for a user with no group yet.
    pub primary_group: Option<String>,
    /// All group memberships, including the primary group if set.
    pub groups: Vec<GroupMembership>,
    /// Upload/download credit ratio; `0` means unlimited (leech).
    pub ratio: u32,
    /// Signed credit balance in KiB; may go negative under ratio enforcement.
    pub credits_kib: i64,
    /// Number of successful logins.
    pub login_count: u64,
    /// Total bytes uploaded.
    pub bytes_uploaded: u64,
    /// Total bytes downloaded.
    pub bytes_downloaded: u64,
    /// IP-mask allow list; a login must match at least one entry.
    pub ip_masks: Vec<IpMask>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Last successful login, if any.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Soft-delete marker; a deleted user must never authenticate.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// A brand new user record with sane defaults, not yet persisted.
    pub fn new(name: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        User {
            name: name.into().to_lowercase(),
            password_hash: password_hash.into(),
            primary_group: None,
            groups: Vec::new(),
            ratio: 1,
            credits_kib: 0,
            login_count: 0,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
            ip_masks: Vec::new(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
            deleted_at: None,
        }
    }

    /// True if this account may still authenticate.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Names of all groups this user belongs to.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|m| m.group.as_str())
    }

    /// True if this user is a group-admin of `group`.
    pub fn is_group_admin(&self, group: &str) -> bool {
        self.groups.iter().any(|m| m.group == group && m.is_admin)
    }
}

/// A single member's slot in a [`Group`]'s membership map.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemberInfo {
    /// Name of whoever added this member (may be the member itself).
    pub added_by: String,
    /// When the membership was created.
    pub added_at: DateTime<Utc>,
}

/// A registered group.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Group {
    /// Lowercase group name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Maximum number of members; `0` means the group admits no members.
    pub slots: u32,
    /// Member name -> membership metadata.
    pub members: BTreeMap<String, MemberInfo>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// A brand new, empty group record, not yet persisted.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Group {
            name: name.into().to_lowercase(),
            description: description.into(),
            slots: 0,
            members: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds `member`, refusing when full unless the member is already present
    /// (idempotent add), per the group-slot invariant.
    pub fn add_member(&mut self, member: &str, added_by: &str) -> Result<(), crate::ErrorKind> {
        let member = member.to_lowercase();
        if self.members.contains_key(&member) {
            return Ok(());
        }
        if self.members.len() as u32 >= self.slots {
            return Err(crate::ErrorKind::GroupFull);
        }
        self.members.insert(
            member,
            MemberInfo {
                added_by: added_by.to_lowercase(),
                added_at: Utc::now(),
            },
        );
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_slots_blocks_every_add() {
        let mut group = Group::new("newgroup", "");
        assert!(matches!(group.add_member("admin", "admin"), Err(crate::ErrorKind::GroupFull)));
    }

    #[test]
    fn add_is_idempotent_and_respects_slots() {
        let mut group = Group::new("newgroup", "");
        group.slots = 2;
        assert!(group.add_member("admin", "admin").is_ok());
        assert!(group.add_member("admin", "admin").is_ok());
        group.slots = 1;
        assert!(matches!(group.add_member("another", "admin"), Err(crate::ErrorKind::GroupFull)));
        assert_eq!(group.members.len(), 1);
    }
}
