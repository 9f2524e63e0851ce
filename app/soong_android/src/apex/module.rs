/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use allocative::Allocative;
use parking_lot::Mutex;

use crate::apex::availability::check_available_for_apex;
use crate::apex::availability::AVAILABLE_TO_PLATFORM;
use crate::apex::info::ApexInfo;

/// Properties common to every module that can be built for an APEX.
#[derive(Debug, Clone, Default, Allocative)]
pub struct ApexProperties {
    /// APEXes that may contain the module. Empty means the platform only.
    pub apex_available: Vec<String>,
    pub in_any_apex: bool,
    pub directly_in_any_apex: bool,
    /// Set on every variant when any variant is directly in an APEX.
    pub any_variant_directly_in_any_apex: bool,
    pub not_available_for_platform: bool,
    pub unique_apex_variations_for_deps: bool,
    pub test_apexes: Vec<String>,
}

/// State embedded by module types that implement
/// [`ApexModule`](crate::apex::ApexModule).
#[derive(Debug, Default, Allocative)]
pub struct ApexModuleBase {
    pub properties: ApexProperties,
    can_have_apex_variants: bool,
    /// Filled concurrently by the bundles that include the module.
    #[allocative(skip)]
    apex_infos: Mutex<Vec<ApexInfo>>,
}

impl Clone for ApexModuleBase {
    fn clone(&self) -> Self {
        ApexModuleBase {
            properties: self.properties.clone(),
            can_have_apex_variants: self.can_have_apex_variants,
            apex_infos: Mutex::new(self.apex_infos.lock().clone()),
        }
    }
}

impl ApexModuleBase {
    /// A base that can have APEX variants. A default base never gets any.
    pub fn new(apex_available: Vec<String>) -> ApexModuleBase {
        ApexModuleBase {
            properties: ApexProperties {
                apex_available,
                ..ApexProperties::default()
            },
            can_have_apex_variants: true,
            apex_infos: Mutex::new(Vec::new()),
        }
    }

    /// The `apex_available` list, defaulting to the platform.
    pub fn apex_available(&self) -> Vec<String> {
        if self.properties.apex_available.is_empty() {
            vec![AVAILABLE_TO_PLATFORM.to_owned()]
        } else {
            self.properties.apex_available.clone()
        }
    }

    /// Records that the module is part of `apex`.
    ///
    /// Infos with an already recorded variation name only add their APEX
    /// module name, which happens for overriding APEXes.
    pub fn build_for_apex(&self, apex: ApexInfo) {
        let mut infos = self.apex_infos.lock();
        if let Some(existing) = infos
            .iter_mut()
            .find(|i| i.apex_variation_name == apex.apex_variation_name)
        {
            if apex.in_apex_modules.len() != 1 {
                panic!("Newly created apexInfo must be for a single APEX");
            }
            let module = &apex.in_apex_modules[0];
            if !existing.in_apex_modules.contains(module) {
                existing.in_apex_modules.push(module.clone());
            }
            return;
        }
        infos.push(apex);
    }

    pub(crate) fn take_apex_infos(&self) -> Vec<ApexInfo> {
        std::mem::take(&mut *self.apex_infos.lock())
    }

    pub fn can_have_apex_variants(&self) -> bool {
        self.can_have_apex_variants
    }

    pub fn in_any_apex(&self) -> bool {
        self.properties.in_any_apex
    }

    pub fn directly_in_any_apex(&self) -> bool {
        self.properties.directly_in_any_apex
    }

    /// Whether the module is in an APEX and so must not be exposed to the
    /// platform directly.
    pub fn not_in_platform(&self) -> bool {
        self.properties.any_variant_directly_in_any_apex
            || !self.available_for(AVAILABLE_TO_PLATFORM)
    }

    pub fn available_for(&self, what: &str) -> bool {
        check_available_for_apex(what, &self.properties.apex_available)
    }

    pub fn not_available_for_platform(&self) -> bool {
        self.properties.not_available_for_platform
    }

    pub fn set_not_available_for_platform(&mut self) {
        self.properties.not_available_for_platform = true;
    }

    pub fn unique_apex_variations_for_deps(&self) -> bool {
        self.properties.unique_apex_variations_for_deps
    }

    pub fn test_apexes(&self) -> &[String] {
        &self.properties.test_apexes
    }
}

#[cfg(test)]
mod tests {
    use soong_core::api_level::ApiLevel;

    use super::*;

    fn info(variation: &str, module: &str) -> ApexInfo {
        ApexInfo {
            apex_variation_name: variation.to_owned(),
            min_sdk_version: ApiLevel::future(),
            in_apex_variants: vec![variation.to_owned()],
            in_apex_modules: vec![module.to_owned()],
            ..ApexInfo::default()
        }
    }

    #[test]
    fn test_build_for_apex_dedups_by_variation() {
        let base = ApexModuleBase::new(Vec::new());
        base.build_for_apex(info("com.android.foo", "com.android.foo"));
        base.build_for_apex(info("com.android.foo", "com.mycompany.android.foo"));
        base.build_for_apex(info("com.android.foo", "com.android.foo"));
        base.build_for_apex(info("com.android.bar", "com.android.bar"));
        let infos = base.take_apex_infos();
        assert_eq!(2, infos.len());
        assert_eq!(
            vec![
                "com.android.foo".to_owned(),
                "com.mycompany.android.foo".to_owned()
            ],
            infos[0].in_apex_modules
        );
        assert!(base.take_apex_infos().is_empty());
    }

    #[test]
    #[should_panic(expected = "Newly created apexInfo must be for a single APEX")]
    fn test_build_for_apex_rejects_merged_info() {
        let base = ApexModuleBase::new(Vec::new());
        base.build_for_apex(info("com.android.foo", "com.android.foo"));
        let mut merged = info("com.android.foo", "a");
        merged.in_apex_modules.push("b".to_owned());
        base.build_for_apex(merged);
    }

    #[test]
    fn test_not_in_platform() {
        let mut base = ApexModuleBase::new(vec!["com.android.foo".to_owned()]);
        assert!(base.not_in_platform());
        base.properties.apex_available.push(AVAILABLE_TO_PLATFORM.to_owned());
        assert!(!base.not_in_platform());
        base.properties.any_variant_directly_in_any_apex = true;
        assert!(base.not_in_platform());
    }

    #[test]
    fn test_default_availability() {
        let base = ApexModuleBase::new(Vec::new());
        assert_eq!(vec![AVAILABLE_TO_PLATFORM.to_owned()], base.apex_available());
        assert!(base.available_for(AVAILABLE_TO_PLATFORM));
        assert!(!ApexModuleBase::default().can_have_apex_variants());
    }
}
