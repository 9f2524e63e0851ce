/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Typed values attached to a module variant by mutators and read by the
//! modules that depend on it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

/// Identifies a provider and the type of its value.
///
/// Keys are compared by name, so every key must have a unique name.
pub struct ProviderKey<T> {
    name: &'static str,
    mutator: Option<&'static str>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ProviderKey<T> {
    pub const fn new(name: &'static str) -> ProviderKey<T> {
        ProviderKey {
            name,
            mutator: None,
            _phantom: PhantomData,
        }
    }

    /// A provider that may only be set by the mutator named `mutator`.
    pub const fn new_mutator_provider(
        name: &'static str,
        mutator: &'static str,
    ) -> ProviderKey<T> {
        ProviderKey {
            name,
            mutator: Some(mutator),
            _phantom: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mutator(&self) -> Option<&'static str> {
        self.mutator
    }
}

impl<T> fmt::Debug for ProviderKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderKey")
            .field("name", &self.name)
            .field("mutator", &self.mutator)
            .finish()
    }
}

/// Providers of one module variant.
///
/// Cloning shares the values, which is how new variants inherit the
/// providers of the module they were split from.
#[derive(Default)]
pub struct ProviderStore {
    values: RwLock<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl Clone for ProviderStore {
    fn clone(&self) -> Self {
        ProviderStore {
            values: RwLock::new(self.values.read().clone()),
        }
    }
}

impl fmt::Debug for ProviderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.read();
        let mut names: Vec<_> = values.keys().collect();
        names.sort();
        f.debug_struct("ProviderStore")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderStore {
    /// Set a provider while running `mutator`.
    ///
    /// Panics if the provider was already set, or if it is restricted to
    /// another mutator.
    pub fn set<T: Send + Sync + 'static>(&self, key: &ProviderKey<T>, value: T, mutator: &str) {
        if let Some(allowed) = key.mutator {
            if allowed != mutator {
                panic!(
                    "provider {} can only be set during the {} mutator, not {}",
                    key.name, allowed, mutator
                );
            }
        }
        let mut values = self.values.write();
        if values.contains_key(key.name) {
            panic!("provider {} was already set", key.name);
        }
        values.insert(key.name, Arc::new(value));
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &ProviderKey<T>) -> Option<T> {
        let values = self.values.read();
        let value = values.get(key.name)?;
        match value.downcast_ref::<T>() {
            Some(v) => Some(v.clone()),
            None => panic!(
                "provider {} holds a value of another type than its key",
                key.name
            ),
        }
    }

    pub fn contains<T>(&self, key: &ProviderKey<T>) -> bool {
        self.values.read().contains_key(key.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static NAMES: ProviderKey<Vec<String>> = ProviderKey::new("Names");
    static RESTRICTED: ProviderKey<u32> = ProviderKey::new_mutator_provider("Restricted", "apex");

    #[test]
    fn test_set_get() {
        let store = ProviderStore::default();
        assert_eq!(None, store.get(&NAMES));
        store.set(&NAMES, vec!["a".to_owned()], "any");
        assert_eq!(Some(vec!["a".to_owned()]), store.get(&NAMES));
        assert!(store.contains(&NAMES));

        let copy = store.clone();
        assert_eq!(Some(vec!["a".to_owned()]), copy.get(&NAMES));
    }

    #[test]
    fn test_mutator_provider() {
        let store = ProviderStore::default();
        store.set(&RESTRICTED, 7, "apex");
        assert_eq!(Some(7), store.get(&RESTRICTED));
    }

    #[test]
    #[should_panic(expected = "provider Restricted can only be set during the apex mutator, not image")]
    fn test_mutator_provider_wrong_mutator() {
        ProviderStore::default().set(&RESTRICTED, 7, "image");
    }

    #[test]
    #[should_panic(expected = "provider Names was already set")]
    fn test_set_twice() {
        let store = ProviderStore::default();
        store.set(&NAMES, Vec::new(), "a");
        store.set(&NAMES, Vec::new(), "a");
    }
}
