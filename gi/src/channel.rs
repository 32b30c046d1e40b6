//! Relation channel abstraction
//!
//! The orchestration runtime owns the real channel. This module only names
//! what the protocol needs from it: our own writable partition, read access
//! to each joined remote unit's partition, and the units that departed since
//! we last looked.

use tracing::debug;

use crate::request::{Databag, UnitName};

/// Notification delivered by the runtime
///
/// Notifications may be dropped, duplicated, or replayed. Handlers recompute
/// from current channel contents instead of trusting the event sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Joined(UnitName),
    Changed(UnitName),
    Departed(UnitName),
    /// The whole relation is being torn down
    Broken,
}

/// One side's view of a relation
pub trait Relation {
    /// Our own partition (read)
    fn local(&self) -> &Databag;

    /// Our own partition (write)
    fn local_mut(&mut self) -> &mut Databag;

    /// Currently joined remote units, in join order
    fn units(&self) -> Vec<UnitName>;

    /// A joined remote unit's partition
    fn remote(&self, unit: &str) -> Option<&Databag>;

    /// Drain units that departed since the last call, with their last data
    fn take_departed(&mut self) -> Vec<(UnitName, Databag)>;
}

/// In-process relation, used by tests and the `simulate` command
///
/// Replication is explicit: a remote partition only changes when
/// [`MemoryRelation::replicate`] copies the peer's data in, which makes
/// delayed or skipped propagation easy to model.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelation {
    local: Databag,
    remotes: Vec<(UnitName, Databag)>,
    departed: Vec<(UnitName, Databag)>,
}

impl MemoryRelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A remote unit joins with an empty partition
    pub fn join(&mut self, unit: impl Into<UnitName>) -> ChannelEvent {
        let unit = unit.into();
        debug!(%unit, "MemoryRelation::join: called");
        if !self.remotes.iter().any(|(name, _)| *name == unit) {
            self.remotes.push((unit.clone(), Databag::new()));
        }
        ChannelEvent::Joined(unit)
    }

    /// A remote unit leaves; its last data stays readable via `take_departed`
    pub fn depart(&mut self, unit: &str) -> Option<ChannelEvent> {
        debug!(%unit, "MemoryRelation::depart: called");
        let idx = self.remotes.iter().position(|(name, _)| name == unit)?;
        let entry = self.remotes.remove(idx);
        self.departed.push(entry);
        Some(ChannelEvent::Departed(unit.to_string()))
    }

    /// Copy a peer's published partition into our view of `unit`
    pub fn replicate(&mut self, unit: &str, source: &Databag) -> Option<ChannelEvent> {
        debug!(%unit, keys = source.len(), "MemoryRelation::replicate: called");
        let (_, bag) = self.remotes.iter_mut().find(|(name, _)| name == unit)?;
        *bag = source.clone();
        Some(ChannelEvent::Changed(unit.to_string()))
    }

    /// Direct write access to a remote partition
    pub fn remote_mut(&mut self, unit: &str) -> Option<&mut Databag> {
        self.remotes
            .iter_mut()
            .find(|(name, _)| name == unit)
            .map(|(_, bag)| bag)
    }
}

impl Relation for MemoryRelation {
    fn local(&self) -> &Databag {
        &self.local
    }

    fn local_mut(&mut self) -> &mut Databag {
        &mut self.local
    }

    fn units(&self) -> Vec<UnitName> {
        self.remotes.iter().map(|(name, _)| name.clone()).collect()
    }

    fn remote(&self, unit: &str) -> Option<&Databag> {
        self.remotes.iter().find(|(name, _)| name == unit).map(|(_, bag)| bag)
    }

    fn take_departed(&mut self) -> Vec<(UnitName, Databag)> {
        std::mem::take(&mut self.departed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let mut rel = MemoryRelation::new();
        assert_eq!(rel.join("gcp-integrator/0"), ChannelEvent::Joined("gcp-integrator/0".into()));
        rel.join("gcp-integrator/0");
        assert_eq!(rel.units(), vec!["gcp-integrator/0".to_string()]);
    }

    #[test]
    fn test_replicate_only_known_units() {
        let mut rel = MemoryRelation::new();
        let mut source = Databag::new();
        source.insert("completed".into(), "{}".into());

        assert!(rel.replicate("ghost/0", &source).is_none());

        rel.join("gcp-integrator/0");
        assert_eq!(
            rel.replicate("gcp-integrator/0", &source),
            Some(ChannelEvent::Changed("gcp-integrator/0".into()))
        );
        assert_eq!(rel.remote("gcp-integrator/0"), Some(&source));
    }

    #[test]
    fn test_depart_keeps_last_data_until_drained() {
        let mut rel = MemoryRelation::new();
        rel.join("worker/0");
        rel.remote_mut("worker/0").unwrap().insert("instance".into(), "\"i-1\"".into());

        assert_eq!(rel.depart("worker/0"), Some(ChannelEvent::Departed("worker/0".into())));
        assert!(rel.units().is_empty());
        assert!(rel.remote("worker/0").is_none());
        assert!(rel.depart("worker/0").is_none());

        let departed = rel.take_departed();
        assert_eq!(departed.len(), 1);
        assert_eq!(departed[0].1.get("instance").map(String::as_str), Some("\"i-1\""));
        assert!(rel.take_departed().is_empty());
    }
}
