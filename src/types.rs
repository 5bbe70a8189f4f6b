//! Core types shared across the synchronization core.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Opaque stable identifier for a versioned entity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// An already-authorized actor identity (issued upstream; never minted here).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        ActorId(id.into())
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({})", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        ActorId(s.to_string())
    }
}

/// A broadcast scope keyed by a domain id. Rooms have no storage of their
/// own; membership is derived from sessions.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    /// The room every subscriber of a project joins.
    pub fn project(id: &EntityId) -> Self {
        RoomId(format!("project:{}", id))
    }
}

impl fmt::Debug for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomId({})", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        RoomId(s.to_string())
    }
}

/// Identifier for one live transport connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-entity version record number, sequential from 1. Independent of the
/// entity's own optimistic-lock counter; the two diverge after a restore.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct VersionNumber(pub u64);

impl VersionNumber {
    pub fn next(self) -> Self {
        VersionNumber(self.0 + 1)
    }
}

impl fmt::Debug for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V({})", self.0)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a stored snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }

    pub fn plus(self, d: Duration) -> Self {
        Timestamp(self.0 + d.as_micros() as i64)
    }

    pub fn minus(self, d: Duration) -> Self {
        Timestamp(self.0 - d.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// The kinds of versioned resource the core manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Scene,
    Comment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Project => "project",
            EntityKind::Scene => "scene",
            EntityKind::Comment => "comment",
        };
        write!(f, "{}", s)
    }
}

/// A versioned mutable resource.
///
/// `version` is the optimistic-lock counter: starts at 1 on creation and
/// increases by exactly 1 per successful mutation, never decreases, never
/// skips. `parent` links scenes and comments to their owning project;
/// projects have no parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub parent: Option<EntityId>,
    pub version: u64,
    pub payload: serde_json::Value,
    pub updated_at: Timestamp,
}

impl Entity {
    /// The project this entity's changes broadcast under.
    pub fn owning_project(&self) -> &EntityId {
        self.parent.as_ref().unwrap_or(&self.id)
    }
}

/// Immutable historical snapshot of one entity at one version number.
///
/// Created whenever a payload-changing mutation succeeds; never mutated
/// afterwards except the archival fields set by the retention sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionRecord {
    pub entity_id: EntityId,
    pub number: VersionNumber,
    pub payload: serde_json::Value,
    pub author: ActorId,
    pub created_at: Timestamp,
    pub change_description: Option<String>,
    pub archived: bool,
    pub archived_at: Option<Timestamp>,
}

/// How a snapshot came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Manual,
    Auto,
    Scheduled,
}

/// What a snapshot covers: one project subtree, or the whole system.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotSubject {
    Project(EntityId),
    Full,
}

impl fmt::Display for SnapshotSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSubject::Project(id) => write!(f, "project {}", id),
            SnapshotSubject::Full => write!(f, "full"),
        }
    }
}

/// Encoding of a snapshot blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobEncoding {
    Json,
    MessagePack,
}

impl Default for BlobEncoding {
    fn default() -> Self {
        BlobEncoding::MessagePack
    }
}

/// Content digest of a snapshot blob (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobDigest(pub [u8; 32]);

impl BlobDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        BlobDigest(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(BlobDigest(arr))
    }
}

impl fmt::Debug for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobDigest({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Snapshot metadata row. The blob itself lives in the vault, keyed by
/// digest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub subject: SnapshotSubject,
    pub kind: SnapshotKind,
    pub digest: BlobDigest,
    pub encoding: BlobEncoding,
    pub size_bytes: u64,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Project membership row, carried through snapshot export and restore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub project: EntityId,
    pub actor: ActorId,
    pub role: String,
}

/// One project subtree as read at a single consistent point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectExport {
    pub project: Entity,
    pub scenes: Vec<Entity>,
    pub comments: Vec<Entity>,
    pub members: Vec<ProjectMember>,
}

impl ProjectExport {
    /// All entities in the subtree, project first.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        std::iter::once(&self.project)
            .chain(self.scenes.iter())
            .chain(self.comments.iter())
    }
}

/// Decoded snapshot blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectExport {
    pub subject: SnapshotSubject,
    pub projects: Vec<ProjectExport>,
    pub exported_at: Timestamp,
}

impl SubjectExport {
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.projects.iter().flat_map(|p| p.entities())
    }
}

/// What a completed restore touched.
#[derive(Clone, Debug)]
pub struct RestoredSubject {
    pub snapshot: SnapshotId,
    pub subject: SnapshotSubject,
    /// Project ids written back.
    pub projects: Vec<EntityId>,
    /// Entities whose payload actually changed (one version record each).
    pub changed: usize,
    /// Entities recreated because they were missing from current storage.
    pub recreated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_roundtrip() {
        let digest = BlobDigest::from_bytes(b"snapshot blob");
        let hex = digest.to_hex();
        let parsed = BlobDigest::from_hex(&hex).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn test_project_room_key() {
        let room = RoomId::project(&EntityId::from("p-1"));
        assert_eq!(room.0, "project:p-1");
    }

    #[test]
    fn test_owning_project() {
        let project = Entity {
            id: EntityId::from("p-1"),
            kind: EntityKind::Project,
            parent: None,
            version: 1,
            payload: serde_json::json!({}),
            updated_at: Timestamp::now(),
        };
        assert_eq!(project.owning_project(), &EntityId::from("p-1"));

        let scene = Entity {
            id: EntityId::from("s-1"),
            kind: EntityKind::Scene,
            parent: Some(EntityId::from("p-1")),
            ..project.clone()
        };
        assert_eq!(scene.owning_project(), &EntityId::from("p-1"));
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp(1_000_000);
        assert_eq!(t.plus(Duration::from_secs(1)), Timestamp(2_000_000));
        assert_eq!(t.minus(Duration::from_secs(1)), Timestamp(0));
    }
}
