use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

/// Authenticated user reference handed out by the session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Identity),
    SignedOut,
}

pub type SessionHandler = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// Identity capability owned by the composition root and passed down.
pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
    fn on_change(&self, handler: SessionHandler) -> Subscription;
}

type SharedHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    handlers: BTreeMap<u64, SharedHandler>,
}

/// Handler bookkeeping shared by provider implementations.
#[derive(Clone, Default)]
pub struct SessionListeners {
    table: Arc<Mutex<ListenerTable>>,
}

impl SessionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: SessionHandler) -> Subscription {
        let Ok(mut table) = self.table.lock() else {
            return Subscription::detached();
        };
        let id = table.next_id;
        table.next_id += 1;
        table.handlers.insert(id, Arc::from(handler));
        Subscription {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    pub fn notify(&self, event: &SessionEvent) {
        // Handlers run outside the lock so they may unsubscribe themselves.
        let handlers: Vec<SharedHandler> = match self.table.lock() {
            Ok(table) => table.handlers.values().cloned().collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .map(|table| table.handlers.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live registration of a session handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl Subscription {
    fn detached() -> Self {
        Self {
            id: 0,
            table: Weak::new(),
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            if let Ok(mut table) = table.lock() {
                table.handlers.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// In-process session: identity is set by the caller (CLI config, tests).
#[derive(Default)]
pub struct LocalSession {
    current: Mutex<Option<Identity>>,
    listeners: SessionListeners,
}

impl LocalSession {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            current: Mutex::new(identity),
            listeners: SessionListeners::new(),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(identity.clone());
        }
        self.listeners.notify(&SessionEvent::SignedIn(identity));
    }

    pub fn sign_out(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        self.listeners.notify(&SessionEvent::SignedOut);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl SessionProvider for LocalSession {
    fn current(&self) -> Option<Identity> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    fn on_change(&self, handler: SessionHandler) -> Subscription {
        self.listeners.subscribe(handler)
    }
}
