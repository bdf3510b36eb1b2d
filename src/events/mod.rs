//! In-process publish/subscribe for entity changes.
//!
//! Delivery is synchronous and best-effort: handlers run on the emitting task, nothing
//! is persisted, and a subscriber only sees events emitted while it is registered.

mod debounce;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::cache::RecordId;

pub use debounce::Debouncer;

/// What happened to the entities named by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Created,
  Updated,
  Deleted,
  BulkUpdate,
  Invalidate,
}

/// Task events and generic table events share one shape on separate channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
  Tasks,
  Table(String),
}

impl Channel {
  pub fn for_collection(collection: &str) -> Self {
    if collection == crate::models::Task::COLLECTION {
      Channel::Tasks
    } else {
      Channel::Table(collection.to_string())
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
  pub kind: EventKind,
  pub channel: Channel,
  pub ids: Vec<RecordId>,
}

impl CacheEvent {
  pub fn new(kind: EventKind, channel: Channel, ids: Vec<RecordId>) -> Self {
    Self { kind, channel, ids }
  }

  /// Wire name of the event, e.g. `TASK_UPDATED` or `ENTITY_UPDATED`.
  pub fn name(&self) -> &'static str {
    match (&self.channel, self.kind) {
      (_, EventKind::Invalidate) => "CACHE_INVALIDATE",
      (Channel::Tasks, EventKind::Created) => "TASK_CREATED",
      (Channel::Tasks, EventKind::Updated) => "TASK_UPDATED",
      (Channel::Tasks, EventKind::Deleted) => "TASK_DELETED",
      (Channel::Tasks, EventKind::BulkUpdate) => "TASKS_BULK_UPDATE",
      (Channel::Table(_), EventKind::Created) => "ENTITY_CREATED",
      (Channel::Table(_), EventKind::Updated) => "ENTITY_UPDATED",
      (Channel::Table(_), EventKind::Deleted) => "ENTITY_DELETED",
      (Channel::Table(_), EventKind::BulkUpdate) => "ENTITY_BULK_UPDATE",
    }
  }
}

type Handler = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Registration {
  id: u64,
  channel: Channel,
  kind: Option<EventKind>,
  handler: Handler,
}

#[derive(Default)]
struct Handlers {
  next_id: u64,
  registrations: Vec<Registration>,
}

/// Event bus shared by the caches and their consumers. Clone is cheap.
#[derive(Clone, Default)]
pub struct EventBus {
  handlers: Arc<Mutex<Handlers>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Subscribe to one kind of event on a channel.
  pub fn on<F>(&self, kind: EventKind, channel: Channel, handler: F) -> Subscription
  where
    F: Fn(&CacheEvent) + Send + Sync + 'static,
  {
    self.register(channel, Some(kind), Arc::new(handler))
  }

  /// Subscribe to every event on a channel.
  pub fn on_channel<F>(&self, channel: Channel, handler: F) -> Subscription
  where
    F: Fn(&CacheEvent) + Send + Sync + 'static,
  {
    self.register(channel, None, Arc::new(handler))
  }

  /// Coalesce every event on `channel` into one `refresh` call per quiet `window`.
  ///
  /// Must be called from within a tokio runtime.
  pub fn debounced<F>(&self, channel: Channel, window: Duration, refresh: F) -> Subscription
  where
    F: FnMut() + Send + 'static,
  {
    let debouncer = Debouncer::spawn(window, refresh);
    self.on_channel(channel, move |_| debouncer.trigger())
  }

  pub fn emit(&self, event: CacheEvent) {
    // Handlers run outside the lock so they may subscribe or emit themselves.
    let matching: Vec<Handler> = {
      let handlers = self.lock();
      handlers
        .registrations
        .iter()
        .filter(|r| r.channel == event.channel && r.kind.map_or(true, |k| k == event.kind))
        .map(|r| Arc::clone(&r.handler))
        .collect()
    };

    for handler in matching {
      handler(&event);
    }
  }

  pub fn subscriber_count(&self) -> usize {
    self.lock().registrations.len()
  }

  fn register(&self, channel: Channel, kind: Option<EventKind>, handler: Handler) -> Subscription {
    let mut handlers = self.lock();
    let id = handlers.next_id;
    handlers.next_id += 1;
    handlers.registrations.push(Registration {
      id,
      channel,
      kind,
      handler,
    });

    Subscription {
      handlers: Arc::downgrade(&self.handlers),
      id,
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Handlers> {
    self
      .handlers
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Handle returned by [`EventBus::on`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
  handlers: Weak<Mutex<Handlers>>,
  id: u64,
}

impl Subscription {
  pub fn unsubscribe(self) {
    // Drop does the work
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(handlers) = self.handlers.upgrade() {
      let mut handlers = handlers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      handlers.registrations.retain(|r| r.id != self.id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn counter() -> (Arc<AtomicUsize>, impl Fn(&CacheEvent) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    (count, move |_: &CacheEvent| {
      handle.fetch_add(1, Ordering::SeqCst);
    })
  }

  #[test]
  fn test_event_names() {
    let updated = CacheEvent::new(EventKind::Updated, Channel::Tasks, vec![]);
    assert_eq!(updated.name(), "TASK_UPDATED");

    let bulk = CacheEvent::new(EventKind::BulkUpdate, Channel::Tasks, vec![]);
    assert_eq!(bulk.name(), "TASKS_BULK_UPDATE");

    let generic = CacheEvent::new(EventKind::Deleted, Channel::Table("users".into()), vec![]);
    assert_eq!(generic.name(), "ENTITY_DELETED");

    let invalidate = CacheEvent::new(EventKind::Invalidate, Channel::Tasks, vec![]);
    assert_eq!(invalidate.name(), "CACHE_INVALIDATE");
  }

  #[test]
  fn test_delivery_is_scoped_by_channel_and_kind() {
    let bus = EventBus::new();
    let (task_updates, handler) = counter();
    let _sub = bus.on(EventKind::Updated, Channel::Tasks, handler);

    bus.emit(CacheEvent::new(EventKind::Updated, Channel::Tasks, vec![RecordId::Int(1)]));
    bus.emit(CacheEvent::new(EventKind::Deleted, Channel::Tasks, vec![RecordId::Int(1)]));
    bus.emit(CacheEvent::new(
      EventKind::Updated,
      Channel::Table("users".into()),
      vec![RecordId::Int(1)],
    ));

    assert_eq!(task_updates.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_unsubscribe_stops_delivery() {
    let bus = EventBus::new();
    let (count, handler) = counter();
    let sub = bus.on_channel(Channel::Tasks, handler);

    bus.emit(CacheEvent::new(EventKind::Created, Channel::Tasks, vec![]));
    sub.unsubscribe();
    bus.emit(CacheEvent::new(EventKind::Created, Channel::Tasks, vec![]));

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(bus.subscriber_count(), 0);
  }

  #[test]
  fn test_late_subscriber_sees_no_replay() {
    let bus = EventBus::new();
    bus.emit(CacheEvent::new(EventKind::Created, Channel::Tasks, vec![]));

    let (count, handler) = counter();
    let _sub = bus.on_channel(Channel::Tasks, handler);
    assert_eq!(count.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_handler_may_emit() {
    let bus = EventBus::new();
    let (count, handler) = counter();
    let _inner = bus.on(EventKind::Invalidate, Channel::Tasks, handler);

    let relay = bus.clone();
    let _outer = bus.on(EventKind::Deleted, Channel::Tasks, move |_| {
      relay.emit(CacheEvent::new(EventKind::Invalidate, Channel::Tasks, vec![]));
    });

    bus.emit(CacheEvent::new(EventKind::Deleted, Channel::Tasks, vec![]));
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_burst_of_updates_triggers_one_refresh() {
    let bus = EventBus::new();
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    let _sub = bus.debounced(Channel::Tasks, Duration::from_millis(100), move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    for id in 0..5i64 {
      bus.emit(CacheEvent::new(EventKind::Updated, Channel::Tasks, vec![RecordId::Int(id)]));
      tokio::time::sleep(Duration::from_millis(4)).await;
    }
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);

    bus.emit(CacheEvent::new(EventKind::Updated, Channel::Tasks, vec![RecordId::Int(9)]));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(refreshes.load(Ordering::SeqCst), 2);
  }
}
