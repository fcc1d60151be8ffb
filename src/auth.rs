use log::{debug, info};

type AuthCallback = Box<dyn FnMut(Option<&str>)>;

/// The one fact the quiz needs from authentication: which admin, if any, is
/// signed in. Sign-in itself happens elsewhere.
#[derive(Default)]
pub struct AuthState {
    current: Option<String>,
    listeners: Vec<AuthCallback>,
}

impl AuthState {
    pub fn new(current: Option<String>) -> Self {
        AuthState {
            current: current.filter(|uid| !uid.trim().is_empty()),
            listeners: Vec::new(),
        }
    }

    pub fn current_uid(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Calls `callback` now with the current admin and again on every change.
    pub fn on_change<F>(&mut self, mut callback: F)
    where
        F: FnMut(Option<&str>) + 'static,
    {
        callback(self.current.as_deref());
        self.listeners.push(Box::new(callback));
    }

    pub fn sign_in(&mut self, uid: &str) {
        info!("[Auth] Signed in as {}", uid);
        self.set(Some(uid.to_string()));
    }

    pub fn sign_out(&mut self) {
        info!("[Auth] Signed out");
        self.set(None);
    }

    fn set(&mut self, uid: Option<String>) {
        let uid = uid.filter(|uid| !uid.trim().is_empty());
        if uid == self.current {
            return;
        }
        self.current = uid;
        debug!("[Auth] Notifying {} listeners", self.listeners.len());
        for listener in self.listeners.iter_mut() {
            listener(self.current.as_deref());
        }
    }
}
