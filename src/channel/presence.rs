//! Presence synchronization: full state replace on `presence_state`,
//! incremental join/leave application on `presence_diff`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Server wire form of one presence meta entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPresenceMeta {
    pub phx_ref: Option<String>,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPresenceEntries {
    pub metas: Vec<RawPresenceMeta>,
}

/// Server wire form of a full presence snapshot: presence key -> metas.
pub type RawPresenceState = HashMap<String, RawPresenceEntries>;

/// Server wire form of an incremental presence update.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPresenceDiff {
    pub joins: RawPresenceState,
    pub leaves: RawPresenceState,
}

/// Client-side presence meta, with the server ref renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub presence_ref: String,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

pub type PresenceState = HashMap<String, Vec<PresenceMeta>>;

/// Joins and leaves observed by one sync step.
#[derive(Debug, Default)]
pub struct PresenceChanges {
    pub joins: PresenceState,
    pub leaves: PresenceState,
}

/// Presence book-keeping for one channel.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    state: PresenceState,
}

impl Presence {
    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    /// Replace the full state from a `presence_state` snapshot, reporting
    /// which refs appeared and disappeared relative to the previous state.
    pub fn sync_state(&mut self, raw: RawPresenceState) -> PresenceChanges {
        let new_state = transform_state(raw);

        let new_refs: HashSet<&String> = refs_of(&new_state).collect();
        let current_refs: HashSet<&String> = refs_of(&self.state).collect();

        let joins = filter_metas(&new_state, |meta| !current_refs.contains(&meta.presence_ref));
        let leaves = filter_metas(&self.state, |meta| !new_refs.contains(&meta.presence_ref));

        self.state = new_state;
        PresenceChanges { joins, leaves }
    }

    /// Apply a `presence_diff`: add joined metas, drop left metas by ref.
    pub fn sync_diff(&mut self, diff: RawPresenceDiff) -> PresenceChanges {
        let joins = transform_state(diff.joins);
        let leaves = transform_state(diff.leaves);

        for (key, metas) in &joins {
            self.state
                .entry(key.clone())
                .or_default()
                .extend(metas.iter().cloned());
        }

        for (key, metas) in &leaves {
            if let Some(existing) = self.state.get_mut(key) {
                let left: HashSet<&String> =
                    metas.iter().map(|meta| &meta.presence_ref).collect();
                existing.retain(|meta| !left.contains(&meta.presence_ref));
                if existing.is_empty() {
                    self.state.remove(key);
                }
            }
        }

        PresenceChanges { joins, leaves }
    }
}

fn refs_of(state: &PresenceState) -> impl Iterator<Item = &String> {
    state
        .values()
        .flat_map(|metas| metas.iter().map(|meta| &meta.presence_ref))
}

fn filter_metas(state: &PresenceState, keep: impl Fn(&PresenceMeta) -> bool) -> PresenceState {
    state
        .iter()
        .filter_map(|(key, metas)| {
            let kept: Vec<PresenceMeta> = metas.iter().filter(|m| keep(m)).cloned().collect();
            if kept.is_empty() {
                None
            } else {
                Some((key.clone(), kept))
            }
        })
        .collect()
}

fn transform_state(raw: RawPresenceState) -> PresenceState {
    raw.into_iter()
        .map(|(key, entries)| {
            let metas = entries
                .metas
                .into_iter()
                .map(|meta| PresenceMeta {
                    presence_ref: meta.phx_ref.unwrap_or_default(),
                    data: meta.data,
                })
                .collect();
            (key, metas)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_state(value: serde_json::Value) -> RawPresenceState {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn sync_state_replaces_and_reports_changes() {
        let mut presence = Presence::default();

        let changes = presence.sync_state(raw_state(json!({
            "u1": {"metas": [{"phx_ref": "r1", "name": "ana"}]},
            "u2": {"metas": [{"phx_ref": "r2", "name": "bo"}]}
        })));
        assert_eq!(changes.joins.len(), 2);
        assert!(changes.leaves.is_empty());

        let changes = presence.sync_state(raw_state(json!({
            "u1": {"metas": [{"phx_ref": "r1", "name": "ana"}]},
            "u3": {"metas": [{"phx_ref": "r3", "name": "cy"}]}
        })));
        assert_eq!(changes.joins.len(), 1);
        assert!(changes.joins.contains_key("u3"));
        assert_eq!(changes.leaves.len(), 1);
        assert!(changes.leaves.contains_key("u2"));
        assert_eq!(presence.state().len(), 2);
    }

    #[test]
    fn sync_diff_adds_and_removes_by_ref() {
        let mut presence = Presence::default();
        presence.sync_state(raw_state(json!({
            "u1": {"metas": [{"phx_ref": "r1"}, {"phx_ref": "r1b"}]}
        })));

        let diff: RawPresenceDiff = serde_json::from_value(json!({
            "joins": {"u2": {"metas": [{"phx_ref": "r2"}]}},
            "leaves": {"u1": {"metas": [{"phx_ref": "r1"}]}}
        }))
        .unwrap();
        presence.sync_diff(diff);

        assert_eq!(presence.state()["u1"].len(), 1);
        assert_eq!(presence.state()["u1"][0].presence_ref, "r1b");
        assert_eq!(presence.state()["u2"][0].presence_ref, "r2");
    }

    #[test]
    fn sync_diff_drops_emptied_keys() {
        let mut presence = Presence::default();
        presence.sync_state(raw_state(json!({
            "u1": {"metas": [{"phx_ref": "r1"}]}
        })));

        let diff: RawPresenceDiff = serde_json::from_value(json!({
            "joins": {},
            "leaves": {"u1": {"metas": [{"phx_ref": "r1"}]}}
        }))
        .unwrap();
        presence.sync_diff(diff);
        assert!(presence.state().is_empty());
    }
}
