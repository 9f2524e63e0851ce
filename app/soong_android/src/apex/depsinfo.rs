/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Dependency lists of APEX bundles, used to review what an APEX pulls in.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use std::path::PathBuf;

use itertools::Itertools;

use crate::apex::walk_payload_deps;
use crate::context::BaseModuleContext;
use crate::provider::ProviderKey;

/// One module in the payload of an APEX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApexModuleDepInfo {
    pub to: String,
    /// Modules that depend on `to` inside the APEX.
    pub from: Vec<String>,
    /// Only reached across the APEX boundary.
    pub is_external: bool,
    pub min_sdk_version: String,
}

pub type DepNameToDepInfoMap = BTreeMap<String, ApexModuleDepInfo>;

/// The rendered dependency lists of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApexBundleDepsInfo {
    /// Every dependency with the modules that pull it in.
    pub full_list: String,
    /// Just the dependencies.
    pub flat_list: String,
    pub full_list_path: PathBuf,
    pub flat_list_path: PathBuf,
    /// `<bundle>-depsinfo`, building both lists.
    pub phony_name: String,
}

pub static APEX_BUNDLE_DEPS_INFO_PROVIDER: ProviderKey<ApexBundleDepsInfo> =
    ProviderKey::new_mutator_provider("ApexBundleDepsInfo", "apex_checks");

/// Renders the full and flat dependency lists of `module_name`.
pub fn build_deps_info_lists(
    module_name: &str,
    min_sdk_version: &str,
    dep_infos: &DepNameToDepInfoMap,
    out_dir: &Path,
) -> ApexBundleDepsInfo {
    let mut full_list = String::new();
    let mut flat_list = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(full_list, "{}(minSdkVersion:{}):", module_name, min_sdk_version);
    for info in dep_infos.values() {
        let mut to_name = format!("{}(minSdkVersion:{})", info.to, info.min_sdk_version);
        if info.is_external {
            to_name.push_str(" (external)");
        }
        let from = info.from.iter().sorted().dedup().join(", ");
        let _ = writeln!(full_list, "  {} <- {}", to_name, from);
        let _ = writeln!(flat_list, "{}", to_name);
    }
    let depsinfo_dir = out_dir.join(module_name).join("depsinfo");
    ApexBundleDepsInfo {
        full_list,
        flat_list,
        full_list_path: depsinfo_dir.join("fulllist.txt"),
        flat_list_path: depsinfo_dir.join("flatlist.txt"),
        phony_name: format!("{}-depsinfo", module_name),
    }
}

/// Collects the payload of the visited bundle, stopping at the APEX
/// boundary.
pub fn build_apex_dependency_info(ctx: &BaseModuleContext<'_>) -> DepNameToDepInfoMap {
    let mut dep_infos = DepNameToDepInfoMap::new();
    walk_payload_deps(ctx, |dep| {
        let from_name = dep.from_module.name();
        let to_name = dep.to_module.name();
        if from_name == to_name {
            return !dep.external;
        }
        // Modules only available to APEXes are written with updatability in
        // mind and need no review.
        if dep.to_apex.apex_module_base().not_available_for_platform() {
            return !dep.external;
        }
        if dep.tag.skip_apex_allowed_dependencies_check() {
            return !dep.external;
        }
        match dep_infos.get_mut(to_name) {
            Some(info) => {
                if !info.from.iter().any(|f| f == from_name) {
                    info.from.push(from_name.to_owned());
                }
                info.is_external = info.is_external && dep.external;
            }
            None => {
                let level = dep.to_apex.min_sdk_version(ctx.config());
                let min_sdk_version = if level.is_none() {
                    "(no version)".to_owned()
                } else {
                    level.to_string()
                };
                dep_infos.insert(
                    to_name.to_owned(),
                    ApexModuleDepInfo {
                        to: to_name.to_owned(),
                        from: vec![from_name.to_owned()],
                        is_external: dep.external,
                        min_sdk_version,
                    },
                );
            }
        }
        !dep.external
    });
    dep_infos
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;

    fn dep(to: &str, from: &[&str], is_external: bool, min_sdk: &str) -> ApexModuleDepInfo {
        ApexModuleDepInfo {
            to: to.to_owned(),
            from: from.iter().map(|s| (*s).to_owned()).collect(),
            is_external,
            min_sdk_version: min_sdk.to_owned(),
        }
    }

    #[test]
    fn test_build_deps_info_lists() {
        let infos = btreemap! {
            "libz".to_owned() => dep("libz", &["libfoo", "libbar", "libfoo"], false, "29"),
            "liba".to_owned() => dep("liba", &["com.android.foo"], true, "(no version)"),
        };
        let deps = build_deps_info_lists("com.android.foo", "29", &infos, Path::new("/out"));
        assert_eq!(
            "com.android.foo(minSdkVersion:29):\n\
             \x20 liba(minSdkVersion:(no version)) (external) <- com.android.foo\n\
             \x20 libz(minSdkVersion:29) <- libbar, libfoo\n",
            deps.full_list
        );
        assert_eq!(
            "liba(minSdkVersion:(no version)) (external)\nlibz(minSdkVersion:29)\n",
            deps.flat_list
        );
        assert_eq!("com.android.foo-depsinfo", deps.phony_name);
        assert_eq!(
            Path::new("/out/com.android.foo/depsinfo/fulllist.txt"),
            deps.full_list_path
        );
    }

    #[test]
    fn test_empty_lists() {
        let deps = build_deps_info_lists("apex", "current", &BTreeMap::new(), Path::new("out"));
        assert_eq!("apex(minSdkVersion:current):\n", deps.full_list);
        assert_eq!("", deps.flat_list);
    }
}
