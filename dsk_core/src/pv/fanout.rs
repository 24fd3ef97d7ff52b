//! Subscriber and replica sets of an input PV.
//!
//! Delivery walks both sets by index under a [`ReentrantLock`]. A delivery
//! target may push, subscribe or unsubscribe on the same PV from inside the
//! walk. Additions take effect immediately; removals requested while nested
//! are queued and applied by the outermost holder once its walk ends.

use dsk_common::value::{PvStatus, Timestamp, Value};
use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crate::component::{Component, ComponentCore, component_event};
use crate::pv::{InputPv, OutputPv};
use crate::sync::{DepthGuard, ReentrantLock};

#[derive(Default)]
struct Links {
    subscribers: Vec<Weak<OutputPv>>,
    replicas: Vec<Weak<InputPv>>,
    pending_unsubscribe: Vec<Weak<OutputPv>>,
    pending_stop: Vec<Weak<InputPv>>,
}

impl Links {
    fn apply_pending(&mut self) {
        for gone in std::mem::take(&mut self.pending_unsubscribe) {
            self.subscribers.retain(|s| !Weak::ptr_eq(s, &gone));
        }
        for gone in std::mem::take(&mut self.pending_stop) {
            self.replicas.retain(|r| !Weak::ptr_eq(r, &gone));
        }
        self.subscribers.retain(|s| s.strong_count() > 0);
        self.replicas.retain(|r| r.strong_count() > 0);
    }
}

#[derive(Default)]
pub(crate) struct FanOut {
    links: ReentrantLock<RefCell<Links>>,
}

impl FanOut {
    pub(crate) fn subscribe(&self, receiver: &Arc<OutputPv>) -> bool {
        let target = Arc::downgrade(receiver);
        let guard = self.links.lock();
        let mut links = guard.borrow_mut();
        links.pending_unsubscribe.retain(|p| !Weak::ptr_eq(p, &target));
        if links.subscribers.iter().any(|s| Weak::ptr_eq(s, &target)) {
            return false;
        }
        links.subscribers.push(target);
        true
    }

    pub(crate) fn unsubscribe(&self, receiver: &Arc<OutputPv>) {
        let target = Arc::downgrade(receiver);
        let guard = self.links.lock();
        if guard.is_outermost() {
            guard
                .borrow_mut()
                .subscribers
                .retain(|s| !Weak::ptr_eq(s, &target));
        } else {
            guard.borrow_mut().pending_unsubscribe.push(target);
        }
    }

    pub(crate) fn replicate_to(&self, destination: &Arc<InputPv>) -> bool {
        let target = Arc::downgrade(destination);
        let guard = self.links.lock();
        let mut links = guard.borrow_mut();
        links.pending_stop.retain(|p| !Weak::ptr_eq(p, &target));
        if links.replicas.iter().any(|r| Weak::ptr_eq(r, &target)) {
            return false;
        }
        links.replicas.push(target);
        true
    }

    pub(crate) fn stop_replication_to(&self, destination: &Arc<InputPv>) {
        let target = Arc::downgrade(destination);
        let guard = self.links.lock();
        if guard.is_outermost() {
            guard
                .borrow_mut()
                .replicas
                .retain(|r| !Weak::ptr_eq(r, &target));
        } else {
            guard.borrow_mut().pending_stop.push(target);
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        let guard = self.links.lock();
        let links = guard.borrow();
        links
            .subscribers
            .iter()
            .filter(|s| !links.pending_unsubscribe.iter().any(|p| Weak::ptr_eq(p, s)))
            .count()
    }

    pub(crate) fn replica_count(&self) -> usize {
        let guard = self.links.lock();
        let links = guard.borrow();
        links
            .replicas
            .iter()
            .filter(|r| !links.pending_stop.iter().any(|p| Weak::ptr_eq(p, r)))
            .count()
    }

    /// Drop every link.
    pub(crate) fn clear(&self) {
        let guard = self.links.lock();
        let mut links = guard.borrow_mut();
        if guard.is_outermost() {
            *links = Links::default();
        } else {
            let subscribers = links.subscribers.clone();
            let replicas = links.replicas.clone();
            links.pending_unsubscribe.extend(subscribers);
            links.pending_stop.extend(replicas);
        }
    }

    /// Forward a value to every subscriber and replica.
    ///
    /// Failures are logged against `source` and never reach the producer.
    pub(crate) fn deliver(
        &self,
        source: &ComponentCore,
        timestamp: Timestamp,
        value: &Value,
        status: PvStatus,
    ) {
        let guard = self.links.lock();

        let mut index = 0;
        while let Some(receiver) = next(&guard, |l| l.subscribers.get(index).cloned()) {
            index += 1;
            let Some(receiver) = receiver.upgrade() else {
                continue;
            };
            if let Err(err) = receiver.write(timestamp, value.clone()) {
                component_event!(
                    source,
                    warn,
                    "Delivery to subscriber {} failed: {}",
                    receiver.core().full_name(),
                    err
                );
            }
        }

        let mut index = 0;
        while let Some(replica) = next(&guard, |l| l.replicas.get(index).cloned()) {
            index += 1;
            let Some(replica) = replica.upgrade() else {
                continue;
            };
            if let Err(err) = replica.push_with_status(timestamp, value.clone(), status) {
                component_event!(
                    source,
                    warn,
                    "Replication to {} failed: {}",
                    replica.core().full_name(),
                    err
                );
            }
        }

        if guard.is_outermost() {
            guard.borrow_mut().apply_pending();
        }
    }
}

/// Read one slot without keeping the `RefCell` borrowed across delivery.
fn next<T>(guard: &DepthGuard<'_, RefCell<Links>>, pick: impl FnOnce(&Links) -> Option<T>) -> Option<T> {
    pick(&guard.borrow())
}
