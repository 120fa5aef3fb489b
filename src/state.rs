use std::sync::Arc;

use crate::channel::StateChannel;
use crate::config::{Config, SessionConfig};
use crate::coordinator::{RetryPolicy, SlotCoordinator};
use crate::data::SessionStore;
use crate::lifecycle::LifecycleManager;

/// The synchronization core, all sharing one injected store.
#[derive(Clone)]
pub struct SessionServices {
    pub lifecycle: LifecycleManager,
    pub coordinator: SlotCoordinator,
    pub channel: StateChannel,
}

impl SessionServices {
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        Self {
            lifecycle: LifecycleManager::new(store.clone(), config),
            coordinator: SlotCoordinator::new(store.clone(), RetryPolicy::from(config)),
            channel: StateChannel::new(store),
        }
    }
}

pub struct AppState {
    pub services: SessionServices,
    pub config: Arc<Config>,
}

pub type SharedState = Arc<AppState>;
