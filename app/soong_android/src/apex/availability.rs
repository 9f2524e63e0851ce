/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The `apex_available` property.

use crate::context::BaseModuleContext;

/// Makes a module available to the platform.
pub const AVAILABLE_TO_PLATFORM: &str = "//apex_available:platform";

/// Makes a module available to every APEX.
pub const AVAILABLE_TO_ANY_APEX: &str = "//apex_available:anyapex";

/// APEXes that may include any module regardless of its list.
const MAINLINE_PRIMARY_LIBS_APEXES: &[&str] = &[
    "com.google.mainline.primary.libs",
    "com.google.mainline.go.primary.libs",
];

/// Old and new name of the Bluetooth APEX, accepted for each other.
const BLUETOOTH_APEX_ALIASES: (&str, &str) = ("com.android.bt", "com.android.btservices");

/// Whether a module with the given `apex_available` list may be part of
/// `what`, which is an APEX name or [`AVAILABLE_TO_PLATFORM`].
///
/// An entry `com.foo.*` matches every APEX whose name starts with `com.foo.`.
/// An empty list means available to the platform only.
pub fn check_available_for_apex(what: &str, apex_available: &[String]) -> bool {
    if apex_available.is_empty() {
        return what == AVAILABLE_TO_PLATFORM;
    }
    if MAINLINE_PRIMARY_LIBS_APEXES.contains(&what) {
        return true;
    }
    for entry in apex_available {
        if entry == what {
            return true;
        }
        if entry == AVAILABLE_TO_ANY_APEX && what != AVAILABLE_TO_PLATFORM {
            return true;
        }
        if let Some(prefix) = entry.strip_suffix('*') {
            if entry.ends_with(".*") && what.starts_with(prefix) {
                return true;
            }
        }
        let (old, new) = BLUETOOTH_APEX_ALIASES;
        if (entry == old && what == new) || (entry == new && what == old) {
            return true;
        }
    }
    false
}

/// Whether `a` and `b` list the same entries, ignoring order and
/// duplicates.
pub fn available_to_same_apexes(a: &[String], b: &[String]) -> bool {
    fn normalize(list: &[String]) -> Vec<&str> {
        let mut list: Vec<&str> = list.iter().map(|s| s.as_str()).collect();
        list.sort_unstable();
        list.dedup();
        list
    }
    normalize(a) == normalize(b)
}

/// Reports malformed `apex_available` entries of the visited module.
pub(crate) fn check_apex_available_property(ctx: &BaseModuleContext<'_>, apex_available: &[String]) {
    for entry in apex_available {
        if entry == AVAILABLE_TO_PLATFORM || entry == AVAILABLE_TO_ANY_APEX {
            continue;
        }
        if entry.contains('*') {
            if !entry.ends_with(".*") {
                ctx.property_error(
                    "apex_available",
                    "Wildcard should end with .* like com.foo.*",
                );
            }
            if entry.matches('.').count() < 2 {
                ctx.property_error(
                    "apex_available",
                    "Wildcard requires two or more components like com.foo.*",
                );
            }
            if entry.matches('*').count() != 1 {
                ctx.property_error("apex_available", "Wildcard is not allowed in the middle.");
            }
            continue;
        }
        if !ctx.other_module_exists(entry) && !ctx.config().allow_missing_dependencies() {
            ctx.property_error(
                "apex_available",
                format!("{:?} is not a valid module name", entry),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_empty_list_is_platform_only() {
        assert!(check_available_for_apex(AVAILABLE_TO_PLATFORM, &[]));
        assert!(!check_available_for_apex("com.android.foo", &[]));
    }

    #[test]
    fn test_exact_and_any() {
        let l = list(&["com.android.foo"]);
        assert!(check_available_for_apex("com.android.foo", &l));
        assert!(!check_available_for_apex("com.android.bar", &l));
        assert!(!check_available_for_apex(AVAILABLE_TO_PLATFORM, &l));

        let any = list(&[AVAILABLE_TO_ANY_APEX]);
        assert!(check_available_for_apex("com.android.bar", &any));
        assert!(!check_available_for_apex(AVAILABLE_TO_PLATFORM, &any));
    }

    #[test]
    fn test_wildcard() {
        let l = list(&["com.android.foo.*"]);
        assert!(check_available_for_apex("com.android.foo.bar", &l));
        assert!(!check_available_for_apex("com.android.foo", &l));
        assert!(!check_available_for_apex("com.android.foobar", &l));
    }

    #[test]
    fn test_bluetooth_alias() {
        let l = list(&["com.android.bt"]);
        assert!(check_available_for_apex("com.android.btservices", &l));
        let l = list(&["com.android.btservices"]);
        assert!(check_available_for_apex("com.android.bt", &l));
    }

    #[test]
    fn test_mainline_primary_libs() {
        let l = list(&["com.android.foo"]);
        assert!(check_available_for_apex("com.google.mainline.primary.libs", &l));
        assert!(!check_available_for_apex("com.google.mainline.primary.libs", &[]));
    }

    #[test]
    fn test_available_to_same_apexes() {
        assert!(available_to_same_apexes(
            &list(&["b", "a", "b"]),
            &list(&["a", "b"])
        ));
        assert!(!available_to_same_apexes(
            &list(&[AVAILABLE_TO_PLATFORM]),
            &[]
        ));
        assert!(!available_to_same_apexes(&list(&["a"]), &list(&["b"])));
    }
}
