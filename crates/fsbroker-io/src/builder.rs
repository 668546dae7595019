use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fsbroker_core::Settings;
use tokio::sync::{broadcast, mpsc};

use crate::access::AccessPolicy;
use crate::actor::{Service, ServiceCtx};
use crate::handle::ServiceHandle;
use crate::locks::LockManager;
use crate::path_policy::PathValidator;
use crate::persist::StatePersistence;
use crate::registry::HashRegistry;
use crate::watcher::start_watcher;

/// Configures and starts the fsbroker service.
///
/// `build()` spawns the actor on a dedicated current-thread runtime,
/// performs persistence recovery, and starts the watcher over the
/// configured base directories before the handle is returned.
#[derive(Debug, Default)]
pub struct ServiceBuilder {
    settings: Settings,
    transport: Option<String>,
    event_capacity: Option<usize>,
}

impl ServiceBuilder {
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Convenience for the common case of confining to a directory set
    /// without building a full [`Settings`].
    pub fn with_base_directories<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.settings.crud.base_directories = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Label reported by STATUS; names the transport the embedding
    /// application speaks. Defaults to `"in-process"`.
    pub fn with_transport_label(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    /// Capacity of the change-event broadcast channel.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Spawns the service and returns a handle to it.
    pub fn build(self) -> ServiceHandle {
        let (tx, rx) = mpsc::channel(100);
        let (events_tx, _) = broadcast::channel(self.event_capacity.unwrap_or(128));

        let settings = self.settings;
        let transport = self.transport.unwrap_or_else(|| "in-process".to_string());
        let events_tx_actor = events_tx.clone();

        thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("failed to build service runtime: {e}");
                    return;
                }
            };

            rt.block_on(async move {
                let registry = Arc::new(HashRegistry::new());
                // TTL deadlines are only meaningful when the queue can
                // outlive the process.
                let ttl_multiplier = if settings.persistence.enabled {
                    settings.persistence.ttl_multiplier
                } else {
                    0.0
                };
                let locks = LockManager::new(ttl_multiplier);
                let validator = PathValidator::new(&settings.crud.base_directories);
                let policy = AccessPolicy::new(
                    &settings.crud.access_rules,
                    settings.crud.default_destructive_policy,
                );
                let persistence = StatePersistence::new(
                    &settings.persistence,
                    settings.crud.max_file_size_bytes,
                    Arc::clone(&registry),
                    locks.clone(),
                );

                persistence.load().await;

                let watch_roots: Vec<PathBuf> = validator.base_directories().to_vec();
                let mut watcher = (settings.watcher.enabled && !watch_roots.is_empty()).then(|| {
                    start_watcher(
                        watch_roots,
                        Duration::from_millis(settings.watcher.debounce_ms),
                        Arc::clone(&registry),
                        settings.crud.max_file_size_bytes,
                        events_tx_actor.clone(),
                    )
                });

                let ctx = Arc::new(ServiceCtx {
                    settings,
                    validator,
                    policy,
                    locks,
                    registry,
                    persistence,
                    events_tx: events_tx_actor,
                    started_at: Instant::now(),
                    transport,
                });

                Service::new(rx, ctx).run().await;

                if let Some(watcher) = watcher.as_mut() {
                    watcher.stop();
                }
            });
        });

        ServiceHandle { tx, events_tx }
    }
}
