//! OwnerRegistry - 宣言メソッドの owner インスタンスを供給する
//!
//! DI コンテナの代わりに、起動時に factory を明示的に登録します。
//! インスタンスは owner ごとに 1 つだけ作られ、キャッシュされます。

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::errors::BoxError;

use super::binding::OwnerRef;
use super::invoker::OwnerInstance;

type OwnerFactory = Arc<dyn Fn() -> Result<OwnerInstance, BoxError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnerError {
    #[error("owner {0} is already registered")]
    AlreadyRegistered(OwnerRef),

    #[error("no owner registered under {0}")]
    NotFound(OwnerRef),

    #[error("owner {owner} could not be constructed: {reason}")]
    Construction { owner: OwnerRef, reason: String },
}

#[derive(Default)]
pub struct OwnerRegistry {
    factories: HashMap<OwnerRef, OwnerFactory>,
    instances: HashMap<OwnerRef, OwnerInstance>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; the owner is constructed on first use.
    pub fn register<T, F>(&mut self, owner: impl Into<OwnerRef>, factory: F) -> Result<(), OwnerError>
    where
        T: Any + Send + Sync,
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let owner = owner.into();
        if self.contains(&owner) {
            return Err(OwnerError::AlreadyRegistered(owner));
        }
        let factory: OwnerFactory = Arc::new(move || {
            let instance: OwnerInstance = Arc::new(factory()?);
            Ok::<_, BoxError>(instance)
        });
        self.factories.insert(owner, factory);
        Ok(())
    }

    /// Register an already constructed owner.
    pub fn register_instance<T>(&mut self, owner: impl Into<OwnerRef>, instance: T) -> Result<(), OwnerError>
    where
        T: Any + Send + Sync,
    {
        let owner = owner.into();
        if self.contains(&owner) {
            return Err(OwnerError::AlreadyRegistered(owner));
        }
        self.instances.insert(owner, Arc::new(instance));
        Ok(())
    }

    pub fn contains(&self, owner: &OwnerRef) -> bool {
        self.factories.contains_key(owner) || self.instances.contains_key(owner)
    }

    /// The owner instance, constructing it on first request.
    ///
    /// A failed construction is not cached: the next request tries again.
    pub fn resolve(&mut self, owner: &OwnerRef) -> Result<OwnerInstance, OwnerError> {
        if let Some(instance) = self.instances.get(owner) {
            return Ok(Arc::clone(instance));
        }
        let factory = self
            .factories
            .get(owner)
            .ok_or_else(|| OwnerError::NotFound(owner.clone()))?;
        let instance = factory().map_err(|e| OwnerError::Construction {
            owner: owner.clone(),
            reason: e.to_string(),
        })?;
        self.instances.insert(owner.clone(), Arc::clone(&instance));
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter;

    #[test]
    fn factory_runs_once_per_owner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut owners = OwnerRegistry::new();
        owners
            .register("Counter", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Counter)
            })
            .unwrap();

        let a = owners.resolve(&"Counter".into()).unwrap();
        let b = owners.resolve(&"Counter".into()).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registering_twice_fails() {
        let mut owners = OwnerRegistry::new();
        owners.register_instance("A", Counter).unwrap();
        let err = owners.register("A", || Ok(Counter)).unwrap_err();
        assert_eq!(err, OwnerError::AlreadyRegistered("A".into()));
    }

    #[test]
    fn unknown_and_failing_owners_are_reported() {
        let mut owners = OwnerRegistry::new();
        owners
            .register::<Counter, _>("Broken", || Err("no database".into()))
            .unwrap();

        assert_eq!(
            owners.resolve(&"Missing".into()).unwrap_err(),
            OwnerError::NotFound("Missing".into())
        );
        assert!(matches!(
            owners.resolve(&"Broken".into()),
            Err(OwnerError::Construction { reason, .. }) if reason == "no database"
        ));
    }
}
