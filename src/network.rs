//! Network awareness: connectivity state, sync settings, and the policy
//! deciding whether background sync may proceed.

use crate::error::CoreResult;
use crate::storage::{JsonDocument, KeyValueStore, SYNC_SETTINGS_KEY};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Wifi,
    Cellular,
    Ethernet,
    None,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    pub is_connected: bool,
    pub is_internet_reachable: bool,
}

impl NetworkState {
    /// The definite "no network" state. Connectivity probes that fail must
    /// resolve to this rather than erroring, so callers can always make a
    /// sync/no-sync decision.
    pub fn disconnected() -> Self {
        Self {
            network_type: NetworkType::None,
            is_connected: false,
            is_internet_reachable: false,
        }
    }
}

/// Port over the platform connectivity monitor.
pub trait ConnectivityProvider: Send + Sync {
    /// Current network state. Never errors: transport failure reports
    /// [`NetworkState::disconnected`].
    fn current_state(&self) -> NetworkState;

    /// Register for state changes; the raw state is forwarded verbatim on
    /// every change. Dropping the subscription unregisters the callback.
    fn subscribe(
        &self,
        callback: Box<dyn Fn(&NetworkState) + Send + Sync>,
    ) -> ConnectivitySubscription;
}

type ChangeCallback = Arc<dyn Fn(&NetworkState) + Send + Sync>;

/// Connectivity provider holding the last state pushed by the platform (or
/// by tests). The platform glue calls [`set_state`](Self::set_state) from
/// its native connectivity callback.
pub struct SharedConnectivity {
    inner: Arc<ConnectivityInner>,
}

struct ConnectivityInner {
    state: Mutex<NetworkState>,
    listeners: Mutex<Vec<(u64, ChangeCallback)>>,
    next_id: Mutex<u64>,
}

impl SharedConnectivity {
    pub fn new(initial: NetworkState) -> Self {
        Self {
            inner: Arc::new(ConnectivityInner {
                state: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
            }),
        }
    }

    pub fn offline() -> Self {
        Self::new(NetworkState::disconnected())
    }

    /// Push a new state and notify every listener with it, verbatim.
    pub fn set_state(&self, state: NetworkState) {
        *self.inner.state.lock().unwrap() = state.clone();
        let listeners: Vec<ChangeCallback> = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in listeners {
            cb(&state);
        }
    }
}

impl ConnectivityProvider for SharedConnectivity {
    fn current_state(&self) -> NetworkState {
        self.inner.state.lock().unwrap().clone()
    }

    fn subscribe(
        &self,
        callback: Box<dyn Fn(&NetworkState) + Send + Sync>,
    ) -> ConnectivitySubscription {
        let id = {
            let mut next = self.inner.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.inner
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::from(callback)));
        ConnectivitySubscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }
}

/// Handle for one connectivity registration; dropping it unregisters.
pub struct ConnectivitySubscription {
    inner: Weak<ConnectivityInner>,
    id: u64,
}

impl Drop for ConnectivitySubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// User-facing sync preferences, persisted as one flat record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub auto_download_enabled: bool,
    pub allow_cellular: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_download_enabled: true,
            allow_cellular: false,
        }
    }
}

/// Persistence wrapper for [`SyncSettings`] under its fixed storage key.
pub struct SyncSettingsStore {
    doc: JsonDocument<SyncSettings>,
}

impl SyncSettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            doc: JsonDocument::new(store, SYNC_SETTINGS_KEY),
        }
    }

    pub async fn load(&self) -> CoreResult<SyncSettings> {
        self.doc.load().await
    }

    pub async fn save(&self, settings: &SyncSettings) -> CoreResult<()> {
        self.doc.save(settings).await
    }
}

/// Decides whether background sync may proceed right now.
pub struct SyncPolicy {
    connectivity: Arc<dyn ConnectivityProvider>,
    settings: SyncSettingsStore,
}

impl SyncPolicy {
    pub fn new(connectivity: Arc<dyn ConnectivityProvider>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            connectivity,
            settings: SyncSettingsStore::new(store),
        }
    }

    /// Current network state; always definite (see [`ConnectivityProvider`]).
    pub fn network_state(&self) -> NetworkState {
        self.connectivity.current_state()
    }

    /// Read persisted settings and decide. A storage failure counts as
    /// default settings — the decision must always resolve.
    pub async fn should_sync(&self) -> bool {
        let settings = match self.settings.load().await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Failed to load sync settings, using defaults: {}", e);
                SyncSettings::default()
            }
        };
        self.should_sync_with_settings(&settings)
    }

    /// Same predicate, but with a settings snapshot the caller already
    /// holds. Callers that just wrote settings use this to avoid re-reading
    /// a possibly stale copy from storage.
    pub fn should_sync_with_settings(&self, settings: &SyncSettings) -> bool {
        if !settings.auto_download_enabled {
            return false;
        }
        let state = self.connectivity.current_state();
        if !state.is_connected {
            return false;
        }
        if state.network_type == NetworkType::Cellular && !settings.allow_cellular {
            return false;
        }
        true
    }

    /// Forward connectivity changes to `callback`, verbatim.
    pub fn subscribe_to_network_changes(
        &self,
        callback: impl Fn(&NetworkState) + Send + Sync + 'static,
    ) -> ConnectivitySubscription {
        self.connectivity.subscribe(Box::new(callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn wifi() -> NetworkState {
        NetworkState {
            network_type: NetworkType::Wifi,
            is_connected: true,
            is_internet_reachable: true,
        }
    }

    fn cellular() -> NetworkState {
        NetworkState {
            network_type: NetworkType::Cellular,
            is_connected: true,
            is_internet_reachable: true,
        }
    }

    fn policy_with(state: NetworkState) -> (SyncPolicy, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let connectivity = Arc::new(SharedConnectivity::new(state));
        (
            SyncPolicy::new(connectivity, store.clone() as Arc<dyn KeyValueStore>),
            store,
        )
    }

    #[tokio::test]
    async fn default_settings_sync_on_wifi_only() {
        let (policy, _) = policy_with(wifi());
        assert!(policy.should_sync().await);

        let (policy, _) = policy_with(cellular());
        assert!(!policy.should_sync().await);

        let (policy, _) = policy_with(NetworkState::disconnected());
        assert!(!policy.should_sync().await);
    }

    #[tokio::test]
    async fn auto_download_disabled_wins_over_everything() {
        let (policy, _) = policy_with(wifi());
        let settings = SyncSettings {
            auto_download_enabled: false,
            allow_cellular: true,
        };
        assert!(!policy.should_sync_with_settings(&settings));
    }

    #[tokio::test]
    async fn cellular_allowed_when_opted_in() {
        let (policy, _) = policy_with(cellular());
        let settings = SyncSettings {
            auto_download_enabled: true,
            allow_cellular: true,
        };
        assert!(policy.should_sync_with_settings(&settings));
    }

    #[tokio::test]
    async fn should_sync_reads_persisted_settings() {
        let (policy, store) = policy_with(cellular());
        let settings_store = SyncSettingsStore::new(store as Arc<dyn KeyValueStore>);
        settings_store
            .save(&SyncSettings {
                auto_download_enabled: true,
                allow_cellular: true,
            })
            .await
            .unwrap();
        assert!(policy.should_sync().await);
    }

    #[test]
    fn subscribers_get_raw_state_verbatim() {
        let connectivity = SharedConnectivity::offline();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = connectivity.subscribe(Box::new(move |state| {
            sink.lock().unwrap().push(state.clone());
        }));

        connectivity.set_state(wifi());
        connectivity.set_state(cellular());
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0], wifi());
            assert_eq!(seen[1], cellular());
        }

        drop(sub);
        connectivity.set_state(NetworkState::disconnected());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
