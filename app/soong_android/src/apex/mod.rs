/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! APEX membership.
//!
//! Every APEX bundle tells the modules it contains that they must be built
//! for it. Those modules are then split by the `apex` transition into a
//! platform variant and one variant per group of APEXes that build them the
//! same way.

pub mod availability;
pub mod depsinfo;
pub mod info;
pub mod membership;
pub mod min_sdk;
pub mod module;
mod mutators;

use soong_core::api_level::ApiLevel;
use soong_core::config::BuildConfig;

pub use crate::apex::info::ApexInfo;
pub use crate::apex::module::ApexModuleBase;
pub use crate::apex::mutators::ApexTransitionMutator;
use crate::context::BaseModuleContext;
use crate::module::DependencyTag;
use crate::module::Module;
use crate::module::ModuleId;
use crate::mutator::RegisterMutatorsContext;

pub const APEX_MUTATOR_NAME: &str = "apex";

/// A module that is built differently when it is part of an APEX.
///
/// Implementors embed an [`ApexModuleBase`]; the hooks below default to the
/// behaviour of a plain library.
pub trait ApexModule: Send + Sync {
    fn apex_module_base(&self) -> &ApexModuleBase;

    fn apex_module_base_mut(&mut self) -> &mut ApexModuleBase;

    /// Whether `dep`, reached through `tag`, goes into the same APEX as this
    /// module. Stub libraries, for example, stay outside.
    fn dep_is_in_same_apex(&self, _dep: &dyn Module, _tag: &dyn DependencyTag) -> bool {
        true
    }

    /// Whether the module is installed into an APEX as a file.
    fn is_installable_to_apex(&self) -> bool {
        false
    }

    /// APEXes whose internals the module may access without being part of
    /// them.
    fn test_for(&self) -> Vec<String> {
        Vec::new()
    }

    /// Disables merging of this module's APEX variants.
    fn unique_apex_variations(&self) -> bool {
        false
    }

    fn always_requires_platform_apex_variant(&self) -> bool {
        false
    }

    /// Fails if the module cannot run on devices at `sdk_version`.
    fn should_support_sdk_version(
        &self,
        config: &BuildConfig,
        sdk_version: &ApiLevel,
    ) -> anyhow::Result<()>;

    /// Reported in the dependency lists of APEX bundles.
    fn min_sdk_version(&self, _config: &BuildConfig) -> ApiLevel {
        ApiLevel::none()
    }
}

/// An APEX bundle: the module that produces an APEX.
pub trait ApexBundle: Send + Sync {
    /// The variation name of the APEX. Overriding APEXes reuse the name of
    /// the APEX they override.
    fn apex_variation_name(&self) -> &str;

    fn set_apex_variation_name(&mut self, name: &str);

    /// Reports an invalid value as a property error.
    fn min_sdk_version(&self, ctx: &BaseModuleContext<'_>) -> ApiLevel;

    fn updatable(&self) -> bool;

    fn use_platform_apis(&self) -> bool;

    fn is_test_apex(&self) -> bool {
        false
    }

    fn for_prebuilt_apex(&self) -> bool {
        false
    }

    /// Name modules use in `apex_available` to refer to this APEX.
    fn apex_available_name(&self) -> Option<&str> {
        None
    }

    /// Whether `dep` is packaged into the APEX.
    fn dep_is_in_same_apex(&self, _dep: &dyn Module, _tag: &dyn DependencyTag) -> bool {
        true
    }
}

/// A module that checks its own dependencies against its min_sdk_version.
pub trait ModuleWithMinSdkVersionCheck: Send + Sync {
    fn min_sdk_version(&self, config: &BuildConfig) -> ApiLevel;

    fn check_min_sdk_version(&self, ctx: &BaseModuleContext<'_>) {
        min_sdk::check_min_sdk_version(ctx, &self.min_sdk_version(ctx.config()));
    }
}

/// The info an APEX bundle hands to its contents.
pub fn generate_apex_info(bundle: &dyn ApexBundle, ctx: &BaseModuleContext<'_>) -> ApexInfo {
    let mut min_sdk_version = bundle.min_sdk_version(ctx);
    if min_sdk_version.is_none() {
        min_sdk_version = ApiLevel::future();
    }
    let name = ctx.module_name().to_owned();
    let variation = bundle.apex_variation_name().to_owned();
    ApexInfo {
        apex_variation_name: variation.clone(),
        min_sdk_version,
        updatable: bundle.updatable(),
        use_platform_apis: bundle.use_platform_apis(),
        in_apex_variants: vec![variation.clone()],
        in_apex_modules: vec![name.clone()],
        apex_contents: Vec::new(),
        for_prebuilt_apex: bundle.for_prebuilt_apex(),
        test_apexes: if bundle.is_test_apex() {
            vec![name]
        } else {
            Vec::new()
        },
        base_apex_name: variation.clone(),
        apex_available_name: bundle
            .apex_available_name()
            .map_or(variation, |n| n.to_owned()),
    }
}

/// Whether `dep`, a direct dependency of `parent` through `tag`, is part of
/// the same APEX as `parent`.
pub fn is_dep_in_same_apex(parent: &dyn Module, dep: &dyn Module, tag: &dyn DependencyTag) -> bool {
    if tag.exclude_from_apex_contents() {
        return false;
    }
    if let Some(bundle) = parent.as_apex_bundle() {
        return bundle.dep_is_in_same_apex(dep, tag);
    }
    match parent.as_apex_module() {
        Some(am) => am.dep_is_in_same_apex(dep, tag),
        None => true,
    }
}

/// One edge visited by [`walk_payload_deps`].
pub struct PayloadDep<'a> {
    pub from: ModuleId,
    pub from_module: &'a dyn Module,
    pub to: ModuleId,
    pub to_module: &'a dyn Module,
    pub to_apex: &'a dyn ApexModule,
    pub tag: &'a dyn DependencyTag,
    /// The edge leaves the APEX.
    pub external: bool,
    /// Module ids from the walk root to `to`.
    pub path: &'a [ModuleId],
}

/// Walks the modules that make up the payload of the visited module.
///
/// Only APEX modules that can have APEX variants are visited, and edges
/// excluded from APEX contents or not part of the payload are skipped. `f`
/// returns whether to walk the dependencies of the visited module.
pub fn walk_payload_deps(ctx: &BaseModuleContext<'_>, mut f: impl FnMut(&PayloadDep<'_>) -> bool) {
    ctx.walk_deps(|step| {
        let Some(to_apex) = step.child.module.as_apex_module() else {
            return false;
        };
        if !to_apex.apex_module_base().can_have_apex_variants() {
            return false;
        }
        if step.child.tag.exclude_from_apex_contents() || !step.child.tag.is_apex_payload() {
            return false;
        }
        let external = !is_dep_in_same_apex(step.parent, step.child.module, step.child.tag);
        f(&PayloadDep {
            from: step.parent_id,
            from_module: step.parent,
            to: step.child.id,
            to_module: step.child.module,
            to_apex,
            tag: step.child.tag,
            external,
            path: step.path,
        })
    });
}

/// The mutators that compute APEX membership and split modules into APEX
/// variants.
pub fn register_apex_mutators(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("apex_test_for_deps", mutators::apex_test_for_deps_mutator);
    ctx.top_down("apex_info", mutators::apex_info_mutator)
        .parallel();
    ctx.bottom_up("apex_unique", mutators::apex_unique_variations_mutator)
        .parallel();
    ctx.bottom_up("apex_test_for", mutators::apex_test_for_mutator)
        .parallel();
    ctx.bottom_up(
        "mark_platform_availability",
        mutators::mark_platform_availability_mutator,
    )
    .parallel();
    ctx.info_based_transition(APEX_MUTATOR_NAME, ApexTransitionMutator);
    ctx.bottom_up("apex_directly_in_any", mutators::apex_directly_in_any_mutator);
}

/// Checks of APEX bundles that need the final graph.
pub fn register_apex_check_mutators(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("apex_checks", mutators::apex_checks_mutator)
        .parallel();
}
