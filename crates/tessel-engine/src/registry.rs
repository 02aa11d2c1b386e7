use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessel_events::{AgentId, ItemId, ObjectId};
use tracing::debug;

use crate::instance::ScriptInstance;

#[derive(Default)]
struct Inner {
    scripts: HashMap<ItemId, Arc<ScriptInstance>>,
    by_object: HashMap<ObjectId, Vec<ItemId>>,
}

/// Authoritative map from script item to its running instance
#[derive(Default)]
pub struct ScriptRegistry {
    inner: RwLock<Inner>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an instance, returning the one it replaced
    pub fn insert(&self, instance: Arc<ScriptInstance>) -> Option<Arc<ScriptInstance>> {
        Self::insert_locked(&mut self.write(), instance)
    }

    /// Insert unless a running instance already holds the item
    ///
    /// A stopping instance is replaced and returned as `Ok(Some(_))`; a
    /// running one is left in place and returned as the error.
    pub fn insert_unless_live(
        &self,
        instance: Arc<ScriptInstance>,
    ) -> Result<Option<Arc<ScriptInstance>>, Arc<ScriptInstance>> {
        let mut inner = self.write();
        if let Some(current) = inner.scripts.get(&instance.item) {
            if !current.is_stopping() {
                return Err(Arc::clone(current));
            }
        }
        Ok(Self::insert_locked(&mut inner, instance))
    }

    fn insert_locked(inner: &mut Inner, instance: Arc<ScriptInstance>) -> Option<Arc<ScriptInstance>> {
        let previous = inner.scripts.insert(instance.item, Arc::clone(&instance));
        if let Some(previous) = &previous {
            if previous.object != instance.object {
                Self::unlink(inner, previous.object, previous.item);
            }
        }
        let items = inner.by_object.entry(instance.object).or_default();
        if !items.contains(&instance.item) {
            items.push(instance.item);
        }
        debug!(target: "scripting", "Registered {} on {}", instance.item, instance.object);
        previous
    }

    fn unlink(inner: &mut Inner, object: ObjectId, item: ItemId) -> bool {
        let Some(items) = inner.by_object.get_mut(&object) else {
            return false;
        };
        items.retain(|i| *i != item);
        if items.is_empty() {
            inner.by_object.remove(&object);
            return true;
        }
        false
    }

    /// Remove exactly this instance; a newer instance under the same item is kept
    ///
    /// Returns `None` if the instance was not registered, otherwise whether
    /// it was the last script on its object.
    pub fn remove_exact(&self, instance: &Arc<ScriptInstance>) -> Option<bool> {
        let mut inner = self.write();
        match inner.scripts.get(&instance.item) {
            Some(current) if Arc::ptr_eq(current, instance) => {}
            _ => return None,
        }
        inner.scripts.remove(&instance.item);
        Some(Self::unlink(&mut inner, instance.object, instance.item))
    }

    pub fn get(&self, item: ItemId) -> Option<Arc<ScriptInstance>> {
        self.read().scripts.get(&item).cloned()
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.read().scripts.contains_key(&item)
    }

    pub fn on_object(&self, object: ObjectId) -> Vec<Arc<ScriptInstance>> {
        let inner = self.read();
        inner
            .by_object
            .get(&object)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| inner.scripts.get(item).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn owned_by(&self, owner: AgentId) -> Vec<Arc<ScriptInstance>> {
        self.read()
            .scripts
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<ScriptInstance>> {
        self.read().scripts.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn object_count(&self) -> usize {
        self.read().by_object.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::HostApi;
    use crate::config::SandboxConfig;
    use crate::sandbox::SandboxManager;
    use crate::testing::compile;

    fn script(object: u64, item: u64) -> Arc<ScriptInstance> {
        let manager = SandboxManager::new(SandboxConfig::default());
        let handle = manager
            .load(compile("default { state_entry() { } }"), &HostApi::standard())
            .unwrap();
        Arc::new(ScriptInstance::new(
            ObjectId(object),
            ItemId(item),
            format!("script{}", item),
            AgentId(9),
            0,
            handle,
            Duration::ZERO,
        ))
    }

    #[test]
    fn test_remove_exact_reports_last_on_object() {
        let registry = ScriptRegistry::new();
        let a = script(1, 10);
        let b = script(1, 11);
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));
        assert_eq!(registry.on_object(ObjectId(1)).len(), 2);

        assert_eq!(registry.remove_exact(&a), Some(false));
        assert_eq!(registry.remove_exact(&a), None);
        assert_eq!(registry.remove_exact(&b), Some(true));
        assert!(registry.is_empty());
        assert_eq!(registry.object_count(), 0);
    }

    #[test]
    fn test_replaced_instance_is_not_removed() {
        let registry = ScriptRegistry::new();
        let old = script(1, 10);
        let new = script(1, 10);
        registry.insert(Arc::clone(&old));
        let replaced = registry.insert(Arc::clone(&new)).unwrap();
        assert!(Arc::ptr_eq(&replaced, &old));

        assert_eq!(registry.remove_exact(&old), None);
        assert!(Arc::ptr_eq(&registry.get(ItemId(10)).unwrap(), &new));
        assert_eq!(registry.on_object(ObjectId(1)).len(), 1);
    }

    #[test]
    fn test_insert_unless_live_keeps_running_instance() {
        let registry = ScriptRegistry::new();
        let first = script(1, 10);
        let second = script(1, 10);
        assert!(matches!(registry.insert_unless_live(Arc::clone(&first)), Ok(None)));

        let held = registry.insert_unless_live(Arc::clone(&second)).unwrap_err();
        assert!(Arc::ptr_eq(&held, &first));
        assert!(Arc::ptr_eq(&registry.get(ItemId(10)).unwrap(), &first));

        assert!(first.begin_stop());
        let replaced = registry.insert_unless_live(Arc::clone(&second)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&registry.get(ItemId(10)).unwrap(), &second));
        assert_eq!(registry.on_object(ObjectId(1)).len(), 1);
    }

    #[test]
    fn test_owned_by() {
        let registry = ScriptRegistry::new();
        registry.insert(script(1, 10));
        registry.insert(script(2, 11));
        assert_eq!(registry.owned_by(AgentId(9)).len(), 2);
        assert!(registry.owned_by(AgentId(8)).is_empty());
    }
}
