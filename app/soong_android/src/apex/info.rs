/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::Arc;

use allocative::Allocative;
use soong_core::api_level::ApiLevel;
use starlark_map::small_map::SmallMap;

use crate::apex::membership::ApexContents;
use crate::provider::ProviderKey;
use crate::transition::TransitionInfo;

/// The APEX an APEX variant of a module is built for.
///
/// After variants with identical build settings were merged, one info can
/// describe several APEXes: see [`merge_apex_variations`].
#[derive(Debug, Clone, Default, Allocative)]
pub struct ApexInfo {
    /// Name of the variation, empty for the platform variant.
    pub apex_variation_name: String,
    pub min_sdk_version: ApiLevel,
    pub updatable: bool,
    /// Whether private platform APIs may be used. Only non-updatable APEXes
    /// allow it.
    pub use_platform_apis: bool,
    /// Variation names of the APEXes merged into this variant.
    pub in_apex_variants: Vec<String>,
    /// Module names of the APEXes this variant is part of.
    pub in_apex_modules: Vec<String>,
    pub apex_contents: Vec<Arc<ApexContents>>,
    /// Prebuilt APEX variants are never merged.
    pub for_prebuilt_apex: bool,
    pub test_apexes: Vec<String>,
    pub base_apex_name: String,
    pub apex_available_name: String,
}

impl PartialEq for ApexInfo {
    fn eq(&self, other: &Self) -> bool {
        self.apex_variation_name == other.apex_variation_name
            && self.min_sdk_version == other.min_sdk_version
            && self.updatable == other.updatable
            && self.use_platform_apis == other.use_platform_apis
            && self.in_apex_variants == other.in_apex_variants
            && self.in_apex_modules == other.in_apex_modules
    }
}

impl ApexInfo {
    /// Name of the variation shared by every APEX that builds the module the
    /// same way, e.g. `apex29` or `apex10000_p`.
    pub fn merged_name(&self) -> String {
        let mut name = format!("apex{}", self.min_sdk_version.final_or_future_int());
        if self.use_platform_apis {
            name.push_str("_p");
        }
        name
    }

    pub fn is_for_platform(&self) -> bool {
        self.apex_variation_name.is_empty()
    }

    pub fn in_apex_variant(&self, apex_variant: &str) -> bool {
        self.in_apex_variants.iter().any(|v| v == apex_variant)
    }

    pub fn in_apex_module(&self, apex_module_name: &str) -> bool {
        self.in_apex_modules.iter().any(|m| m == apex_module_name)
    }
}

impl TransitionInfo for ApexInfo {
    fn variation(&self) -> String {
        self.apex_variation_name.clone()
    }
}

/// Every APEX that includes a module, sorted by variation name.
#[derive(Debug, Clone, Default, Allocative)]
pub struct AllApexInfo {
    pub apex_infos: Vec<ApexInfo>,
}

/// Contents of an APEX bundle.
#[derive(Debug, Clone, Allocative)]
pub struct ApexBundleInfo {
    pub contents: Arc<ApexContents>,
}

/// Contents of the APEXes a test module is a test for.
#[derive(Debug, Clone, Default, Allocative)]
pub struct ApexTestForInfo {
    pub apex_contents: Vec<Arc<ApexContents>>,
}

pub static APEX_INFO_PROVIDER: ProviderKey<ApexInfo> =
    ProviderKey::new_mutator_provider("ApexInfo", "apex");

pub static ALL_APEX_INFO_PROVIDER: ProviderKey<Arc<AllApexInfo>> =
    ProviderKey::new_mutator_provider("AllApexInfo", "apex_info");

pub static APEX_BUNDLE_INFO_PROVIDER: ProviderKey<ApexBundleInfo> =
    ProviderKey::new_mutator_provider("ApexBundleInfo", "apex_info");

pub static APEX_TEST_FOR_INFO_PROVIDER: ProviderKey<ApexTestForInfo> =
    ProviderKey::new_mutator_provider("ApexTestForInfo", "apex_test_for");

/// Merges the infos of APEXes that need the module built the same way.
///
/// Returns the merged infos and, for every input, the pair of its original
/// variation name and the variation it was merged into.
pub fn merge_apex_variations(apex_infos: &[ApexInfo]) -> (Vec<ApexInfo>, Vec<(String, String)>) {
    let mut merged: Vec<ApexInfo> = Vec::new();
    let mut aliases = Vec::new();
    let mut seen: SmallMap<String, usize> = SmallMap::new();
    for info in apex_infos {
        if info.for_prebuilt_apex {
            merged.push(info.clone());
            continue;
        }
        let variant_name = info.apex_variation_name.clone();
        let merged_name = info.merged_name();
        match seen.get(&merged_name) {
            Some(&index) => {
                let m = &mut merged[index];
                m.in_apex_variants.push(variant_name.clone());
                m.in_apex_modules.extend(info.in_apex_modules.iter().cloned());
                m.apex_contents.extend(info.apex_contents.iter().cloned());
                m.updatable = m.updatable || info.updatable;
                // Platform APIs only when every APEX allows them.
                m.use_platform_apis = m.use_platform_apis && info.use_platform_apis;
                m.test_apexes.extend(info.test_apexes.iter().cloned());
            }
            None => {
                seen.insert(merged_name.clone(), merged.len());
                let mut m = info.clone();
                m.apex_variation_name = merged_name.clone();
                merged.push(m);
            }
        }
        aliases.push((variant_name, merged_name));
    }
    (merged, aliases)
}

/// Whether `module_name` is a direct dependency of every APEX in `info`.
pub fn directly_in_all_apexes(info: &ApexInfo, module_name: &str) -> bool {
    info.apex_contents
        .iter()
        .all(|contents| contents.directly_in_apex(module_name))
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;
    use crate::apex::membership::ApexMembership;

    fn info(name: &str, min_sdk: i32, use_platform_apis: bool) -> ApexInfo {
        ApexInfo {
            apex_variation_name: name.to_owned(),
            min_sdk_version: ApiLevel::from_final(min_sdk),
            use_platform_apis,
            in_apex_variants: vec![name.to_owned()],
            in_apex_modules: vec![name.to_owned()],
            ..ApexInfo::default()
        }
    }

    #[test]
    fn test_merged_name() {
        assert_eq!("apex29", info("a", 29, false).merged_name());
        assert_eq!("apex29_p", info("a", 29, true).merged_name());
        let future = ApexInfo {
            min_sdk_version: ApiLevel::future(),
            ..ApexInfo::default()
        };
        assert_eq!("apex10000", future.merged_name());
    }

    #[test]
    fn test_merge_same_settings() {
        let (merged, aliases) = merge_apex_variations(&[
            info("com.android.a", 30, false),
            info("com.android.b", 30, false),
            info("com.android.c", 31, false),
        ]);
        assert_eq!(2, merged.len());
        assert_eq!("apex30", merged[0].apex_variation_name);
        assert_eq!(
            vec!["com.android.a".to_owned(), "com.android.b".to_owned()],
            merged[0].in_apex_variants
        );
        assert_eq!(
            vec!["com.android.a".to_owned(), "com.android.b".to_owned()],
            merged[0].in_apex_modules
        );
        assert_eq!("apex31", merged[1].apex_variation_name);
        assert_eq!(
            vec![
                ("com.android.a".to_owned(), "apex30".to_owned()),
                ("com.android.b".to_owned(), "apex30".to_owned()),
                ("com.android.c".to_owned(), "apex31".to_owned()),
            ],
            aliases
        );
    }

    #[test]
    fn test_merge_keeps_platform_api_apart() {
        let (merged, _) = merge_apex_variations(&[
            info("com.android.a", 30, true),
            info("com.android.b", 30, false),
        ]);
        let names: Vec<_> = merged.iter().map(|m| m.apex_variation_name.as_str()).collect();
        assert_eq!(vec!["apex30_p", "apex30"], names);
        assert!(merged[0].use_platform_apis);
    }

    #[test]
    fn test_merge_prebuilt_is_not_merged() {
        let mut prebuilt = info("com.android.a", 30, false);
        prebuilt.for_prebuilt_apex = true;
        let (merged, aliases) =
            merge_apex_variations(&[prebuilt, info("com.android.b", 30, false)]);
        let names: Vec<_> = merged.iter().map(|m| m.apex_variation_name.as_str()).collect();
        assert_eq!(vec!["com.android.a", "apex30"], names);
        assert_eq!(1, aliases.len());
    }

    #[test]
    fn test_merge_aliases_agree() {
        let a = info("com.android.a", 29, false);
        let b = info("com.android.b", 29, false);
        let (_, aliases) = merge_apex_variations(&[a, b]);
        let lookup = |name: &str| {
            aliases
                .iter()
                .find(|(from, _)| from == name)
                .map(|(_, to)| to.clone())
        };
        assert_eq!(lookup("com.android.a"), lookup("com.android.b"));
    }

    #[test]
    fn test_equality_ignores_contents() {
        let mut a = info("com.android.a", 29, false);
        let b = a.clone();
        a.apex_contents.push(Arc::new(ApexContents::new(btreemap! {
            "libfoo".to_owned() => ApexMembership::DirectlyInApex,
        })));
        assert_eq!(a, b);
        a.updatable = true;
        assert_ne!(a, b);
    }

    #[test]
    fn test_directly_in_all_apexes() {
        let mut a = info("com.android.a", 29, false);
        a.apex_contents = vec![
            Arc::new(ApexContents::new(btreemap! {
                "libfoo".to_owned() => ApexMembership::DirectlyInApex,
                "libbar".to_owned() => ApexMembership::IndirectlyInApex,
            })),
            Arc::new(ApexContents::new(btreemap! {
                "libfoo".to_owned() => ApexMembership::DirectlyInApex,
            })),
        ];
        assert!(directly_in_all_apexes(&a, "libfoo"));
        assert!(!directly_in_all_apexes(&a, "libbar"));
    }
}
