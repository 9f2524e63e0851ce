/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use soong_core::api_level::ApiLevel;

use crate::apex::walk_payload_deps;
use crate::context::BaseModuleContext;

/// Parses a `min_sdk_version` property. An empty value is the none level;
/// an invalid one is reported against the property.
pub fn min_sdk_version_from_value(ctx: &BaseModuleContext<'_>, value: &str) -> ApiLevel {
    if value.is_empty() {
        return ApiLevel::none();
    }
    match ApiLevel::from_user(value, ctx.config().active_codenames()) {
        Ok(level) => level,
        Err(e) => {
            ctx.property_error("min_sdk_version", e.to_string());
            ApiLevel::none()
        }
    }
}

/// Checks that every module in the payload of the visited module supports
/// `min_sdk_version`.
///
/// The walk stops at the payload boundary. Dependencies that check their own
/// min_sdk_version only need to set one.
pub fn check_min_sdk_version(ctx: &BaseModuleContext<'_>, min_sdk_version: &ApiLevel) {
    if ctx.host() {
        return;
    }
    let config = ctx.config();
    if config.is_env_true("EMMA_INSTRUMENT")
        || config.native_coverage_enabled()
        || config.clang_coverage_enabled()
    {
        return;
    }
    if min_sdk_version.is_none() {
        return;
    }
    walk_payload_deps(ctx, |dep| {
        if dep.external {
            return false;
        }
        if dep
            .from_module
            .as_apex_module()
            .is_some_and(|from| !from.dep_is_in_same_apex(dep.to_module, dep.tag))
        {
            return false;
        }
        if let Some(checked) = dep.to_module.as_min_sdk_version_checked() {
            if !checked.min_sdk_version(config).specified() {
                ctx.other_module_error(dep.to, "must set min_sdk_version");
            }
            return false;
        }
        if let Err(e) = dep.to_apex.should_support_sdk_version(config, min_sdk_version) {
            let to_name = dep.to_module.name();
            ctx.other_module_error(
                dep.to,
                format!(
                    "should support min_sdk_version({}) for {:?}: {}.\n\nDependency path: {}\n\nConsider adding 'min_sdk_version: {:?}' to {:?}",
                    min_sdk_version,
                    ctx.module_name(),
                    e,
                    ctx.path_string(dep.path, false),
                    min_sdk_version.to_string(),
                    to_name,
                ),
            );
            return false;
        }
        true
    });
}
