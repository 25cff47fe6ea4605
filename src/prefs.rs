//! User preferences
//!
//! The two switches the portal helper exposes besides the course list. Both
//! default to off and live in the same store as the course cache, so changes
//! made from any surface show up as store notifications.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::cache::store::{read_value, write_value, KeyValueStore, StoreError};

/// Store key for the auto-login switch
pub const AUTO_LOGIN_KEY: &str = "scf_auto_login";

/// Store key for the focus mode switch
pub const FOCUS_MODE_KEY: &str = "scf_focus_mode";

/// A preference stored as a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// Follow the portal's login button automatically when logged out
    AutoLogin,
    /// Hide portal clutter around the course list
    FocusMode,
}

impl Preference {
    pub fn key(self) -> &'static str {
        match self {
            Preference::AutoLogin => AUTO_LOGIN_KEY,
            Preference::FocusMode => FOCUS_MODE_KEY,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            AUTO_LOGIN_KEY => Some(Preference::AutoLogin),
            FOCUS_MODE_KEY => Some(Preference::FocusMode),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Preference::AutoLogin => "auto-login",
            Preference::FocusMode => "focus-mode",
        }
    }
}

/// Snapshot of all preferences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreferenceValues {
    pub auto_login: bool,
    pub focus_mode: bool,
}

/// A preference changed in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceChange {
    pub preference: Preference,
    pub old_value: bool,
    pub new_value: bool,
}

/// Typed access to preferences in a store
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, preference: Preference) -> Result<bool, StoreError> {
        Ok(read_value(self.store.as_ref(), preference.key())
            .await?
            .unwrap_or(false))
    }

    pub async fn set(&self, preference: Preference, enabled: bool) -> Result<(), StoreError> {
        write_value(self.store.as_ref(), preference.key(), &enabled).await
    }

    pub async fn load(&self) -> Result<PreferenceValues, StoreError> {
        Ok(PreferenceValues {
            auto_login: self.get(Preference::AutoLogin).await?,
            focus_mode: self.get(Preference::FocusMode).await?,
        })
    }

    /// Watches the store for preference changes
    ///
    /// Only changes made through this process's store are reported; another
    /// `moodlenav` process writing the same files goes unnoticed.
    pub fn watch(&self) -> PreferenceWatcher {
        PreferenceWatcher {
            changes: self.store.subscribe(),
        }
    }
}

/// Stream of [`PreferenceChange`]s filtered out of store notifications
pub struct PreferenceWatcher {
    changes: broadcast::Receiver<crate::cache::StoreChange>,
}

impl PreferenceWatcher {
    /// Waits for the next preference change
    ///
    /// Returns `None` once the store is gone. Notifications missed because the
    /// receiver lagged are skipped.
    pub async fn next(&mut self) -> Option<PreferenceChange> {
        loop {
            match self.changes.recv().await {
                Ok(change) => {
                    let Some(preference) = Preference::from_key(&change.key) else {
                        continue;
                    };
                    let as_bool = |v: Option<serde_json::Value>| {
                        v.and_then(|v| v.as_bool()).unwrap_or(false)
                    };
                    let old_value = as_bool(change.old_value);
                    let new_value = as_bool(change.new_value);
                    if old_value == new_value {
                        continue;
                    }
                    return Some(PreferenceChange {
                        preference,
                        old_value,
                        new_value,
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "preference watcher lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn prefs() -> (Preferences, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Preferences::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_preferences_default_to_off() {
        let (prefs, _store) = prefs();
        assert_eq!(prefs.load().await.unwrap(), PreferenceValues::default());
    }

    #[tokio::test]
    async fn test_set_and_load() {
        let (prefs, store) = prefs();
        prefs.set(Preference::FocusMode, true).await.unwrap();

        let values = prefs.load().await.unwrap();
        assert!(values.focus_mode);
        assert!(!values.auto_login);
        assert!(store.contains_key(FOCUS_MODE_KEY));
    }

    #[tokio::test]
    async fn test_watch_reports_preference_changes_only() {
        let (prefs, store) = prefs();
        let mut watcher = prefs.watch();

        write_value(&*store, "courses-selected-semester", "2024/JAN")
            .await
            .unwrap();
        prefs.set(Preference::AutoLogin, false).await.unwrap();
        prefs.set(Preference::AutoLogin, true).await.unwrap();

        let change = watcher.next().await.expect("change");
        assert_eq!(
            change,
            PreferenceChange {
                preference: Preference::AutoLogin,
                old_value: false,
                new_value: true,
            }
        );
    }

    #[tokio::test]
    async fn test_keys_match_popup_storage_names() {
        let (prefs, store) = prefs();
        prefs.set(Preference::AutoLogin, true).await.unwrap();
        assert!(store.contains_key("scf_auto_login"));

        write_value(&*store, "scf_focus_mode", &true).await.unwrap();
        assert!(prefs.get(Preference::FocusMode).await.unwrap());
    }

    #[test]
    fn test_key_roundtrip() {
        for pref in [Preference::AutoLogin, Preference::FocusMode] {
            assert_eq!(Preference::from_key(pref.key()), Some(pref));
        }
        assert_eq!(Preference::from_key("other"), None);
    }
}
