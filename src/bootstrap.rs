//! Wiring for a complete data layer session.

use std::sync::Arc;

use tracing::{info, warn};

use crate::actions::{
  ActionContext, ApprovalAction, BatchDeleteAction, Notifier, ReorderAction, TracingNotifier,
};
use crate::api::{HttpApi, RemoteApi};
use crate::cache::{CacheRegistry, EntityCache, RecordStore, SqliteStore};
use crate::config::{Config, SyncConfig};
use crate::crypto::{EncryptionPolicy, SecureStore};
use crate::error::Result;
use crate::events::{Channel, EventBus, Subscription};
use crate::manifest::ManifestVerifier;
use crate::models::{Category, KpiCard, Task, TaskInstance, User};
use crate::state::StateStore;

/// Totals from loading every cache at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupSummary {
  pub readable: usize,
  pub unreadable: usize,
}

/// Every cache, the registry, the orchestrators and the verifier for one session.
pub struct DataLayer {
  pub store: Arc<SecureStore>,
  pub events: EventBus,
  pub registry: Arc<CacheRegistry>,
  pub tasks: EntityCache<Task>,
  pub task_instances: EntityCache<TaskInstance>,
  pub users: EntityCache<User>,
  pub categories: EntityCache<Category>,
  pub kpi_cards: EntityCache<KpiCard>,
  pub verifier: ManifestVerifier,
  pub approvals: ApprovalAction,
  pub reorder: ReorderAction,
  pub batch_delete: BatchDeleteAction,
  sync: SyncConfig,
}

impl DataLayer {
  /// Open the configured store and connect to the configured API.
  ///
  /// Secrets come from the environment, see [`Config::api_token`] and
  /// [`Config::passphrase`].
  pub fn open(config: &Config) -> Result<Self> {
    let path = match &config.storage.path {
      Some(path) => path.clone(),
      None => SqliteStore::default_path()?,
    };
    info!(path = %path.display(), "Opening store");

    let store = Arc::new(SqliteStore::open(&path)?);
    let api = Arc::new(HttpApi::new(&config.api, Config::api_token())?);
    let policy = EncryptionPolicy::with_exemptions(&config.encryption.plaintext_collections);

    Self::from_parts(
      store,
      api,
      policy,
      Config::passphrase().as_deref(),
      Arc::new(TracingNotifier),
      config.sync.clone(),
    )
  }

  pub fn from_parts(
    store: Arc<dyn RecordStore>,
    api: Arc<dyn RemoteApi>,
    policy: EncryptionPolicy,
    passphrase: Option<&str>,
    notifier: Arc<dyn Notifier>,
    sync: SyncConfig,
  ) -> Result<Self> {
    let store = Arc::new(SecureStore::unlock(store, Arc::new(policy), passphrase)?);
    let events = EventBus::new();

    let tasks: EntityCache<Task> = EntityCache::new(store.clone(), api.clone(), events.clone());
    let task_instances: EntityCache<TaskInstance> =
      EntityCache::new(store.clone(), api.clone(), events.clone());
    let users: EntityCache<User> = EntityCache::new(store.clone(), api.clone(), events.clone());
    let categories: EntityCache<Category> =
      EntityCache::new(store.clone(), api.clone(), events.clone());
    let kpi_cards: EntityCache<KpiCard> =
      EntityCache::with_resource(KpiCard::RESOURCE, store.clone(), api.clone(), events.clone());

    let mut registry = CacheRegistry::new(Arc::new(StateStore::new()));
    registry.register(Arc::new(tasks.clone()));
    registry.register(Arc::new(task_instances.clone()));
    registry.register(Arc::new(users.clone()));
    registry.register(Arc::new(categories.clone()));
    registry.register(Arc::new(kpi_cards.clone()));
    let registry = Arc::new(registry);

    let ctx = ActionContext::new(api.clone(), registry.clone(), notifier);

    Ok(Self {
      approvals: ApprovalAction::new(ctx.clone(), tasks.clone(), task_instances.clone()),
      reorder: ReorderAction::new(ctx.clone(), kpi_cards.clone()),
      batch_delete: BatchDeleteAction::new(ctx, tasks.clone(), sync.undo_window()),
      verifier: ManifestVerifier::new(api),
      store,
      events,
      registry,
      tasks,
      task_instances,
      users,
      categories,
      kpi_cards,
      sync,
    })
  }

  pub fn state(&self) -> &Arc<StateStore> {
    self.registry.state()
  }

  pub fn policy(&self) -> &Arc<EncryptionPolicy> {
    self.store.policy()
  }

  /// Load every cache and publish the readable records to the state store.
  ///
  /// Unreadable records are logged and skipped; a table whose records cannot all be
  /// decoded keeps an empty slice until it is refreshed.
  pub async fn init(&self) -> Result<StartupSummary> {
    let mut summary = StartupSummary::default();
    for result in [
      self.tasks.init().await,
      self.task_instances.init().await,
      self.users.init().await,
      self.categories.init().await,
      self.kpi_cards.init().await,
    ] {
      let loaded = result?;
      summary.readable += loaded.readable;
      summary.unreadable += loaded.unreadable;
    }

    if let Err(e) = self.registry.sync_all().await {
      warn!(error = %e, "Some tables could not be published");
    }

    info!(
      readable = summary.readable,
      unreadable = summary.unreadable,
      "Data layer ready"
    );
    Ok(summary)
  }

  /// Keep every table's state slice in step with its cache.
  ///
  /// Bursts of change events on a table collapse into one resync per debounce window.
  /// Resyncing stops when the returned subscriptions are dropped. Must be called from
  /// within a tokio runtime.
  pub fn auto_sync(&self) -> Vec<Subscription> {
    [
      Task::COLLECTION,
      TaskInstance::COLLECTION,
      User::COLLECTION,
      Category::COLLECTION,
      KpiCard::COLLECTION,
    ]
    .into_iter()
    .map(|table| {
      let registry = Arc::clone(&self.registry);
      self
        .events
        .debounced(Channel::for_collection(table), self.sync.debounce(), move || {
          let registry = Arc::clone(&registry);
          tokio::spawn(async move {
            if let Err(e) = registry.sync_table(table).await {
              warn!(table, error = %e, "Background resync failed");
            }
          });
        })
    })
    .collect()
  }
}
