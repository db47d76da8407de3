//! The state log: per-writer deltas and the merged aggregate.
//!
//! A delta is a forward-only stream of self-describing frames. A header
//! frame must precede any event; unknown frame tags are skipped using their
//! length prefix so future event kinds do not break old readers. Deltas are
//! named by the keyed MAC of their serial bytes.

use crate::error::{RepositoryError, Result};
use serde::{Deserialize, Serialize};
use silo_core::{Mac, ResourceKind, Version};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const FRAME_HEADER: u8 = 1;
const FRAME_LOCATE: u8 = 2;
const FRAME_TOMBSTONE: u8 = 3;

/// Where a blob lives: packfile plus the blob's body offset and length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub packfile: Mac,
    pub offset: u64,
    pub length: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct HeaderFrame {
    serial: Uuid,
    version: Version,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocateEvent {
    pub kind: ResourceKind,
    pub mac: Mac,
    pub location: Location,
    #[serde(with = "time::serde::timestamp")]
    pub when: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TombstoneEvent {
    pub kind: ResourceKind,
    pub mac: Mac,
    #[serde(with = "time::serde::timestamp")]
    pub when: OffsetDateTime,
}

/// One writer's batch of events: the unit stored in the `state` namespace.
#[derive(Clone, Debug)]
pub struct StateDelta {
    pub serial: Uuid,
    pub version: Version,
    pub locates: Vec<LocateEvent>,
    pub tombstones: Vec<TombstoneEvent>,
}

impl StateDelta {
    pub fn new(serial: Uuid) -> Self {
        Self {
            serial,
            version: ResourceKind::State.current_version(),
            locates: Vec::new(),
            tombstones: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.locates.is_empty() && self.tombstones.is_empty()
    }

    /// Record a blob location. Refused when this delta already tombstoned
    /// the target packfile: a tombstone must never precede a locate pointing
    /// at the same packfile within one delta.
    pub fn push_locate(
        &mut self,
        kind: ResourceKind,
        mac: Mac,
        location: Location,
        when: OffsetDateTime,
    ) -> Result<()> {
        let tombstoned = self
            .tombstones
            .iter()
            .any(|t| t.kind == ResourceKind::Packfile && t.mac == location.packfile);
        if tombstoned {
            return Err(RepositoryError::Internal(format!(
                "locate for {} {} targets packfile {} already tombstoned in this delta",
                kind,
                mac.short(),
                location.packfile.short()
            )));
        }
        self.locates.push(LocateEvent {
            kind,
            mac,
            location,
            when,
        });
        Ok(())
    }

    pub fn push_tombstone(&mut self, kind: ResourceKind, mac: Mac, when: OffsetDateTime) {
        self.tombstones.push(TombstoneEvent { kind, mac, when });
    }

    /// Serialize to the framed wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_frame(
            &mut out,
            FRAME_HEADER,
            &rmp_serde::to_vec_named(&HeaderFrame {
                serial: self.serial,
                version: self.version,
            })?,
        );
        for locate in &self.locates {
            write_frame(&mut out, FRAME_LOCATE, &rmp_serde::to_vec_named(locate)?);
        }
        for tombstone in &self.tombstones {
            write_frame(
                &mut out,
                FRAME_TOMBSTONE,
                &rmp_serde::to_vec_named(tombstone)?,
            );
        }
        Ok(out)
    }

    /// Parse the framed wire form, skipping unknown frame tags.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut frames = FrameIter { data, position: 0 };

        let (tag, payload) = frames
            .next()
            .transpose()?
            .ok_or_else(|| RepositoryError::Serialization("empty state delta".to_string()))?;
        if tag != FRAME_HEADER {
            return Err(RepositoryError::Serialization(
                "state delta must start with a header frame".to_string(),
            ));
        }
        let header: HeaderFrame = rmp_serde::from_slice(payload)?;
        if !ResourceKind::State.current_version().accepts(header.version) {
            return Err(silo_core::Error::BadVersion(header.version).into());
        }

        let mut delta = StateDelta::new(header.serial);
        delta.version = header.version;
        for frame in frames {
            let (tag, payload) = frame?;
            match tag {
                FRAME_LOCATE => delta.locates.push(rmp_serde::from_slice(payload)?),
                FRAME_TOMBSTONE => delta.tombstones.push(rmp_serde::from_slice(payload)?),
                // Forward compatibility: later event kinds are skipped.
                _ => {}
            }
        }
        Ok(delta)
    }
}

fn write_frame(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    let mut len = [0u8; 4];
    len.copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&len);
    out.extend_from_slice(payload);
}

struct FrameIter<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.data.len() {
            return None;
        }
        let remaining = &self.data[self.position..];
        if remaining.len() < 5 {
            self.position = self.data.len();
            return Some(Err(silo_core::Error::Truncated(
                "state frame header".to_string(),
            )
            .into()));
        }
        let tag = remaining[0];
        let len = u32::from_le_bytes(remaining[1..5].try_into().expect("4 bytes")) as usize;
        if remaining.len() < 5 + len {
            self.position = self.data.len();
            return Some(Err(silo_core::Error::Truncated(
                "state frame payload".to_string(),
            )
            .into()));
        }
        self.position += 5 + len;
        Some(Ok((tag, &remaining[5..5 + len])))
    }
}

/// The merged view of every delta present in the repository.
///
/// Locate conflicts keep every claim; the most recent wins for reads so a
/// purged delta simply uncovers the older claim. Tombstones suppress their
/// targets only once older than the grace window, except for listings of
/// snapshots, which hide tombstoned ids immediately.
pub struct LocalState {
    serial: Uuid,
    per_state: HashMap<Mac, StateDelta>,
    locations: HashMap<(ResourceKind, Mac), LocateEvent>,
    deleted: HashMap<(ResourceKind, Mac), OffsetDateTime>,
}

impl LocalState {
    pub fn new() -> Self {
        Self {
            serial: Uuid::nil(),
            per_state: HashMap::new(),
            locations: HashMap::new(),
            deleted: HashMap::new(),
        }
    }

    pub fn serial(&self) -> Uuid {
        self.serial
    }

    /// The first serial is the repository id, so concurrent first backups
    /// do not collide; once deltas exist the merged serial stands.
    pub fn update_serial_or(&mut self, repository_id: Uuid) {
        if self.serial.is_nil() {
            self.serial = repository_id;
        }
    }

    pub fn insert_state(&mut self, id: Mac, delta: StateDelta) {
        self.serial = delta.serial;
        self.apply(&delta);
        self.per_state.insert(id, delta);
    }

    pub fn remove_state(&mut self, id: Mac) {
        if self.per_state.remove(&id).is_some() {
            self.rebuild();
        }
    }

    pub fn state_ids(&self) -> Vec<Mac> {
        self.per_state.keys().copied().collect()
    }

    fn apply(&mut self, delta: &StateDelta) {
        for event in &delta.locates {
            let key = (event.kind, event.mac);
            match self.locations.get(&key) {
                Some(existing) if existing.when >= event.when => {}
                _ => {
                    self.locations.insert(key, event.clone());
                }
            }
        }
        for event in &delta.tombstones {
            let key = (event.kind, event.mac);
            match self.deleted.get(&key) {
                Some(existing) if *existing >= event.when => {}
                _ => {
                    self.deleted.insert(key, event.when);
                }
            }
        }
    }

    fn rebuild(&mut self) {
        self.locations.clear();
        self.deleted.clear();
        let deltas: Vec<StateDelta> = self.per_state.values().cloned().collect();
        for delta in &deltas {
            self.apply(delta);
        }
    }

    /// Resolve a blob's location, honoring tombstones past the grace window.
    ///
    /// A tombstone only wins against locate events it postdates; content
    /// re-uploaded after a sweep resolves again.
    pub fn locate(
        &self,
        kind: ResourceKind,
        mac: Mac,
        grace: Duration,
        now: OffsetDateTime,
    ) -> Option<Location> {
        let key = (kind, mac);
        let event = self.locations.get(&key)?;
        if let Some(when) = self.deleted.get(&key) {
            if *when >= event.when && now - *when >= grace {
                return None;
            }
        }
        Some(event.location)
    }

    pub fn has(&self, kind: ResourceKind, mac: Mac, grace: Duration, now: OffsetDateTime) -> bool {
        self.locate(kind, mac, grace, now).is_some()
    }

    pub fn list_of_kind(&self, kind: ResourceKind) -> Vec<(Mac, Location)> {
        self.locations
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, mac), e)| (*mac, e.location))
            .collect()
    }

    /// The newest locate timestamp per packfile, used by GC to respect the
    /// grace window.
    pub fn newest_locate_per_packfile(&self) -> HashMap<Mac, OffsetDateTime> {
        let mut newest: HashMap<Mac, OffsetDateTime> = HashMap::new();
        for event in self.locations.values() {
            newest
                .entry(event.location.packfile)
                .and_modify(|when| {
                    if event.when > *when {
                        *when = event.when;
                    }
                })
                .or_insert(event.when);
        }
        newest
    }

    pub fn list_deleted(&self, kind: ResourceKind) -> Vec<(Mac, OffsetDateTime)> {
        self.deleted
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, mac), when)| (*mac, *when))
            .collect()
    }

    pub fn deleted_at(&self, kind: ResourceKind, mac: Mac) -> Option<OffsetDateTime> {
        self.deleted.get(&(kind, mac)).copied()
    }

    /// Non-tombstoned snapshot ids. Tombstones hide snapshots from listings
    /// immediately, even inside the grace window.
    pub fn list_snapshots(&self) -> Vec<Mac> {
        self.locations
            .iter()
            .filter(|((kind, mac), event)| {
                *kind == ResourceKind::Snapshot
                    && match self.deleted.get(&(ResourceKind::Snapshot, *mac)) {
                        Some(when) => *when < event.when,
                        None => true,
                    }
            })
            .map(|((_, mac), _)| *mac)
            .collect()
    }

    /// Every packfile named by any live locate entry.
    pub fn list_packfiles(&self) -> Vec<Mac> {
        let mut packfiles: Vec<Mac> = self
            .locations
            .values()
            .map(|e| e.location.packfile)
            .collect();
        packfiles.sort();
        packfiles.dedup();
        packfiles
    }

    /// A fresh writable delta for one transaction.
    pub fn derive(&self) -> StateDelta {
        StateDelta::new(Uuid::new_v4())
    }

    /// Drop a locate entry, provided it still points at the given packfile.
    pub fn remove_location(&mut self, kind: ResourceKind, mac: Mac, packfile: Mac) {
        let key = (kind, mac);
        if let Some(event) = self.locations.get(&key) {
            if event.location.packfile == packfile {
                self.locations.remove(&key);
            }
        }
    }

    /// Every (kind, mac) whose current location points at `packfile`.
    pub fn locations_in_packfile(&self, packfile: Mac) -> Vec<(ResourceKind, Mac)> {
        self.locations
            .iter()
            .filter(|(_, event)| event.location.packfile == packfile)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Drop every locate entry pointing at `packfile`, returning the keys
    /// removed so the caller can tombstone them.
    pub fn remove_locations_of_packfile(&mut self, packfile: Mac) -> Vec<(ResourceKind, Mac)> {
        let keys = self.locations_in_packfile(packfile);
        for key in &keys {
            self.locations.remove(key);
        }
        keys
    }
}

impl Default for LocalState {
    fn default() -> Self {
        Self::new()
    }
}
