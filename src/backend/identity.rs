use std::sync::RwLock;

use crate::models::Identity;

/// Supplies the signed-in user, if any.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

/// Identity set explicitly by the host app after sign-in.
#[derive(Default)]
pub struct StaticIdentity {
    identity: RwLock<Option<Identity>>,
}

impl StaticIdentity {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity: RwLock::new(identity),
        }
    }

    pub fn set(&self, identity: Option<Identity>) {
        if let Ok(mut guard) = self.identity.write() {
            *guard = identity;
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Identity> {
        self.identity.read().ok().and_then(|guard| guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let provider = StaticIdentity::default();
        assert!(provider.current().is_none());

        provider.set(Some(Identity::parent("p1")));
        assert_eq!(provider.current().unwrap().user_id, "p1");

        provider.set(None);
        assert!(provider.current().is_none());
    }
}
