// Session collaborator
//
// PIN, biometrics and expiry live outside this crate. The runtime only asks
// whether the session is unlocked and for the secret when it signs or
// encrypts.

use crate::crypto::SecretMaterial;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait SessionProvider: Send + Sync {
    fn is_unlocked(&self) -> bool;

    /// Current secret, None while locked
    fn secret(&self) -> Option<SecretMaterial>;
}

/// Session holding one secret in memory, lockable by hand
pub struct StaticSession {
    secret: SecretMaterial,
    unlocked: AtomicBool,
}

impl StaticSession {
    pub fn unlocked(secret: SecretMaterial) -> Self {
        Self {
            secret,
            unlocked: AtomicBool::new(true),
        }
    }

    pub fn locked(secret: SecretMaterial) -> Self {
        Self {
            secret,
            unlocked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) {
        self.unlocked.store(false, Ordering::Release);
    }

    pub fn unlock(&self) {
        self.unlocked.store(true, Ordering::Release);
    }
}

impl SessionProvider for StaticSession {
    fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::Acquire)
    }

    fn secret(&self) -> Option<SecretMaterial> {
        self.is_unlocked().then(|| self.secret.clone())
    }
}
