use bevy_ecs::prelude::Entity;
use serde_json::Value;
use std::fmt;

/// Opaque ticket for one subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Debug)]
struct Subscription {
    handle: SubscriptionHandle,
    name: String,
    target: Entity,
    once: bool,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub target: Entity,
    pub name: String,
    pub payload: Value,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> entity {}", self.name, self.target.index())
    }
}

/// Emission is queued; the runtime drains the queue exactly once per
/// tick, before script updates run.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    queue: Vec<(String, Value)>,
    next_handle: u64,
}

impl EventBus {
    pub fn subscribe(&mut self, name: impl Into<String>, target: Entity) -> SubscriptionHandle {
        self.push_subscription(name.into(), target, false)
    }

    pub fn subscribe_once(&mut self, name: impl Into<String>, target: Entity) -> SubscriptionHandle {
        self.push_subscription(name.into(), target, true)
    }

    fn push_subscription(&mut self, name: String, target: Entity, once: bool) -> SubscriptionHandle {
        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        self.subscriptions.push(Subscription { handle, name, target, once });
        handle
    }

    /// Idempotent: unknown or already-released handles are ignored.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.subscriptions.retain(|sub| sub.handle != handle);
    }

    /// Drops every subscription owned by `target`.
    pub fn release_target(&mut self, target: Entity) {
        self.subscriptions.retain(|sub| sub.target != target);
    }

    pub fn emit(&mut self, name: impl Into<String>, payload: Value) {
        self.queue.push((name.into(), payload));
    }

    /// Once-subscriptions are consumed by their first matching event.
    pub fn drain_deliveries(&mut self) -> Vec<Delivery> {
        if self.queue.is_empty() {
            return Vec::new();
        }
        let events: Vec<(String, Value)> = self.queue.drain(..).collect();
        let mut deliveries = Vec::new();
        for (name, payload) in events {
            let mut consumed: Vec<SubscriptionHandle> = Vec::new();
            for sub in &self.subscriptions {
                if sub.name == name {
                    deliveries.push(Delivery {
                        target: sub.target,
                        name: name.clone(),
                        payload: payload.clone(),
                    });
                    if sub.once {
                        consumed.push(sub.handle);
                    }
                }
            }
            if !consumed.is_empty() {
                self.subscriptions.retain(|sub| !consumed.contains(&sub.handle));
            }
        }
        deliveries
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}
