//! Backend registry.
//!
//! Membership is kept in an immutable snapshot behind an [`ArcSwap`]:
//! readers never lock, writers clone the snapshot under a mutex and swap it
//! in. Deregistration only marks a member as draining; physical removal is
//! done by [`BackendRegistry::sweep_drained`] once the member is idle or its
//! grace period has elapsed.

use crate::backend::{BackendId, BackendSpec};
use crate::error::{LbError, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Default time a draining backend may keep in-flight requests.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(30);

/// A registered backend as the registry sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: BackendId,
    pub weight: u32,
    /// Set once the backend has been deregistered.
    pub draining_since: Option<Instant>,
}

impl Member {
    /// Is this member waiting for removal?
    pub fn is_draining(&self) -> bool {
        self.draining_since.is_some()
    }
}

/// Which members to include in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipFilter {
    All,
    /// Registered and not draining.
    Serving,
    Draining,
}

/// Result of a deregistration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deregistration {
    /// The backend was serving and is now draining.
    Draining,
    /// The backend was already draining; nothing changed.
    AlreadyDraining,
    /// The backend was already removed; nothing changed.
    AlreadyRemoved,
}

#[derive(Debug, Clone, Default)]
struct Membership {
    members: BTreeMap<BackendId, Member>,
    /// Ids that completed draining, so repeated deregistration stays a no-op.
    removed: BTreeSet<BackendId>,
}

/// Holds the set of known backends and their static attributes.
pub struct BackendRegistry {
    current: ArcSwap<Membership>,
    write_lock: Mutex<()>,
    drain_grace: Duration,
    changes: watch::Sender<u64>,
}

impl BackendRegistry {
    /// Create an empty registry with the default drain grace period.
    pub fn new() -> Self {
        Self::with_drain_grace(DEFAULT_DRAIN_GRACE)
    }

    /// Create an empty registry with a custom drain grace period.
    pub fn with_drain_grace(drain_grace: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(Membership::default()),
            write_lock: Mutex::new(()),
            drain_grace,
            changes,
        }
    }

    /// Add a backend. It starts out serving.
    pub fn register(&self, spec: BackendSpec) -> Result<()> {
        self.register_with(spec, |_| {})
    }

    /// [`register`](Self::register), running `on_insert` under the writer
    /// lock before the new member becomes visible to readers or watchers.
    pub fn register_with<H>(&self, spec: BackendSpec, on_insert: H) -> Result<()>
    where
        H: FnOnce(&BackendId),
    {
        if spec.weight == 0 {
            return Err(LbError::InvalidWeight {
                id: spec.id,
                weight: spec.weight,
            });
        }

        self.update(|m| {
            if m.members.contains_key(&spec.id) {
                return Err(LbError::DuplicateBackend(spec.id.clone()));
            }
            on_insert(&spec.id);
            m.removed.remove(&spec.id);
            m.members.insert(
                spec.id.clone(),
                Member {
                    id: spec.id.clone(),
                    weight: spec.weight,
                    draining_since: None,
                },
            );
            Ok(((), true))
        })?;

        info!(backend = %spec.id, weight = spec.weight, "backend registered");
        Ok(())
    }

    /// Start draining a backend.
    ///
    /// Repeating the call for a draining or removed backend is a no-op.
    pub fn deregister(&self, id: &BackendId) -> Result<Deregistration> {
        let outcome = self.update(|m| {
            if m.removed.contains(id) {
                return Ok((Deregistration::AlreadyRemoved, false));
            }
            let member = m
                .members
                .get_mut(id)
                .ok_or_else(|| LbError::UnknownBackend(id.clone()))?;
            if member.is_draining() {
                return Ok((Deregistration::AlreadyDraining, false));
            }
            member.draining_since = Some(Instant::now());
            Ok((Deregistration::Draining, true))
        })?;

        match outcome {
            Deregistration::Draining => info!(backend = %id, "backend draining"),
            _ => debug!(backend = %id, outcome = ?outcome, "repeated deregistration ignored"),
        }
        Ok(outcome)
    }

    /// Change the weight of a registered backend.
    pub fn set_weight(&self, id: &BackendId, weight: u32) -> Result<()> {
        if weight == 0 {
            return Err(LbError::InvalidWeight {
                id: id.clone(),
                weight,
            });
        }
        self.update(|m| {
            let member = m
                .members
                .get_mut(id)
                .ok_or_else(|| LbError::UnknownBackend(id.clone()))?;
            let changed = member.weight != weight;
            member.weight = weight;
            Ok(((), changed))
        })
    }

    /// Look up a single member.
    pub fn get(&self, id: &BackendId) -> Option<Member> {
        self.current.load().members.get(id).cloned()
    }

    /// Is the id registered (serving or draining)?
    pub fn contains(&self, id: &BackendId) -> bool {
        self.current.load().members.contains_key(id)
    }

    /// Snapshot of members matching `filter`, ordered by id.
    pub fn list(&self, filter: MembershipFilter) -> Vec<Member> {
        self.current
            .load()
            .members
            .values()
            .filter(|m| match filter {
                MembershipFilter::All => true,
                MembershipFilter::Serving => !m.is_draining(),
                MembershipFilter::Draining => m.is_draining(),
            })
            .cloned()
            .collect()
    }

    /// Number of registered members, draining included.
    pub fn len(&self) -> usize {
        self.current.load().members.len()
    }

    /// Is the registry empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured drain grace period.
    pub fn drain_grace(&self) -> Duration {
        self.drain_grace
    }

    /// Remove draining members that are idle or whose grace period has
    /// elapsed at `now`. Returns the removed ids.
    pub fn sweep_drained<F>(&self, now: Instant, is_idle: F) -> Vec<BackendId>
    where
        F: Fn(&BackendId) -> bool,
    {
        self.sweep_drained_with(now, is_idle, |_| {})
    }

    /// [`sweep_drained`](Self::sweep_drained), running `on_remove` for each
    /// removed id under the writer lock. A concurrent
    /// [`register_with`](Self::register_with) of the same id is ordered
    /// strictly after it.
    pub fn sweep_drained_with<F, H>(
        &self,
        now: Instant,
        is_idle: F,
        mut on_remove: H,
    ) -> Vec<BackendId>
    where
        F: Fn(&BackendId) -> bool,
        H: FnMut(&BackendId),
    {
        let has_candidates = self
            .current
            .load()
            .members
            .values()
            .any(Member::is_draining);
        if !has_candidates {
            return Vec::new();
        }

        let grace = self.drain_grace;
        let removed = self
            .update(|m| {
                let done: Vec<BackendId> = m
                    .members
                    .values()
                    .filter(|member| match member.draining_since {
                        Some(since) => {
                            is_idle(&member.id) || now.saturating_duration_since(since) >= grace
                        }
                        None => false,
                    })
                    .map(|member| member.id.clone())
                    .collect();
                for id in &done {
                    m.members.remove(id);
                    m.removed.insert(id.clone());
                    on_remove(id);
                }
                let changed = !done.is_empty();
                Ok((done, changed))
            })
            .unwrap_or_default();

        for id in &removed {
            info!(backend = %id, "backend removed after draining");
        }
        removed
    }

    /// Subscribe to membership changes. The value is a version counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Membership) -> Result<(T, bool)>,
    {
        let _guard = self.write_lock.lock();
        let mut next = Membership::clone(&self.current.load());
        let (out, changed) = f(&mut next)?;
        if changed {
            self.current.store(Arc::new(next));
            self.changes.send_modify(|v| *v = v.wrapping_add(1));
        }
        Ok(out)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
