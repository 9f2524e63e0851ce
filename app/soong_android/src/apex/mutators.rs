/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::apex::availability::check_apex_available_property;
use crate::apex::availability::AVAILABLE_TO_PLATFORM;
use crate::apex::depsinfo::build_apex_dependency_info;
use crate::apex::depsinfo::build_deps_info_lists;
use crate::apex::depsinfo::APEX_BUNDLE_DEPS_INFO_PROVIDER;
use crate::apex::generate_apex_info;
use crate::apex::info::merge_apex_variations;
use crate::apex::info::AllApexInfo;
use crate::apex::info::ApexBundleInfo;
use crate::apex::info::ApexInfo;
use crate::apex::info::ApexTestForInfo;
use crate::apex::info::ALL_APEX_INFO_PROVIDER;
use crate::apex::info::APEX_BUNDLE_INFO_PROVIDER;
use crate::apex::info::APEX_INFO_PROVIDER;
use crate::apex::info::APEX_TEST_FOR_INFO_PROVIDER;
use crate::apex::is_dep_in_same_apex;
use crate::apex::membership::ApexContents;
use crate::apex::membership::ApexMembership;
use crate::apex::min_sdk::check_min_sdk_version;
use crate::apex::walk_payload_deps;
use crate::apex::ApexBundle;
use crate::apex::ApexModule;
use crate::context::BaseModuleContext;
use crate::context::BottomUpMutatorContext;
use crate::context::IncomingTransitionContext;
use crate::context::OutgoingTransitionContext;
use crate::context::TopDownMutatorContext;
use crate::context::WalkStep;
use crate::module::DependencyTag;
use crate::module::ModuleId;
use crate::transition::TransitionInfoMutator;

/// Edge from a test to an APEX it is a test for.
#[derive(Debug, Clone, Copy)]
struct TestForDependencyTag;

impl DependencyTag for TestForDependencyTag {
    fn exclude_from_apex_contents(&self) -> bool {
        true
    }
}

pub(crate) fn apex_test_for_deps_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    let test_for = match ctx.module().as_apex_module() {
        Some(am) if ctx.module().base().enabled => am.test_for(),
        _ => return,
    };
    for apex in test_for {
        ctx.add_dependency(Arc::new(TestForDependencyTag), &apex);
    }
}

pub(crate) fn apex_test_for_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    let test_for = match ctx.module().as_apex_module() {
        Some(am) if ctx.module().base().enabled => am.test_for(),
        _ => return,
    };
    if test_for.is_empty() {
        return;
    }
    let mut apex_contents = Vec::new();
    let base = ctx.base();
    base.visit_direct_deps(|dep| {
        if dep.module.as_apex_bundle().is_none() || !test_for.iter().any(|t| t == dep.module.name())
        {
            return;
        }
        if let Some(info) = base.other_module_provider(dep.id, &APEX_BUNDLE_INFO_PROVIDER) {
            apex_contents.push(info.contents);
        }
    });
    ctx.set_provider(&APEX_TEST_FOR_INFO_PROVIDER, ApexTestForInfo { apex_contents });
}

/// Whether the walk from an APEX bundle should include `step.child`.
fn continue_apex_deps_walk(step: &WalkStep<'_>) -> bool {
    let Some(am) = step.child.module.as_apex_module() else {
        return false;
    };
    if !am.apex_module_base().can_have_apex_variants() {
        return false;
    }
    if step.child.tag.always_require_apex_variant() {
        return true;
    }
    is_dep_in_same_apex(step.parent, step.child.module, step.child.tag)
}

/// Visits APEX bundles before their contents. A bundle records its
/// membership in every module it contains; a contained module then collates
/// what all bundles recorded.
pub(crate) fn apex_info_mutator(ctx: &mut TopDownMutatorContext<'_>) {
    if !ctx.module().base().enabled {
        return;
    }
    if let Some(bundle) = ctx.module().as_apex_bundle() {
        apex_bundle_info(ctx, bundle);
    }
    if let Some(am) = ctx.module().as_apex_module() {
        let mut apex_infos = am.apex_module_base().take_apex_infos();
        if !apex_infos.is_empty() {
            apex_infos.sort_by(|a, b| a.apex_variation_name.cmp(&b.apex_variation_name));
            ctx.set_provider(
                &ALL_APEX_INFO_PROVIDER,
                Arc::new(AllApexInfo { apex_infos }),
            );
        }
    }
}

fn apex_bundle_info(ctx: &TopDownMutatorContext<'_>, bundle: &dyn ApexBundle) {
    let base = ctx.base();
    let bundle_id = base.module_id();

    let mut contents: BTreeMap<String, ApexMembership> = BTreeMap::new();
    base.walk_deps(|step| {
        if !continue_apex_deps_walk(step) {
            return false;
        }
        let parent_direct = contents
            .get(step.parent.name())
            .is_some_and(|m| *m == ApexMembership::DirectlyInApex);
        let direct = step.parent_id == bundle_id
            || (step.child.tag.copy_directly_in_any_apex() && parent_direct);
        let membership = contents.entry(step.child.module.name().to_owned()).or_default();
        *membership = membership.add(direct);
        true
    });
    let contents = Arc::new(ApexContents::new(contents));

    let mut info = generate_apex_info(bundle, &base);
    info.apex_contents = vec![contents.clone()];
    base.walk_deps(|step| {
        if !continue_apex_deps_walk(step) {
            return false;
        }
        if let Some(am) = step.child.module.as_apex_module() {
            am.apex_module_base().build_for_apex(info.clone());
        }
        true
    });
    tracing::debug!(
        "APEX {} contains {} modules",
        base.module_name(),
        contents.module_names().count()
    );
    ctx.set_provider(&APEX_BUNDLE_INFO_PROVIDER, ApexBundleInfo { contents });
}

/// Every APEX variant of the module, merged unless the module needs one
/// variant per APEX.
fn apex_variant_infos(base: &BaseModuleContext<'_>, am: &dyn ApexModule) -> Vec<ApexInfo> {
    let Some(all) = base.provider(&ALL_APEX_INFO_PROVIDER) else {
        return Vec::new();
    };
    if unique_apex_variations(am) {
        all.apex_infos.clone()
    } else {
        merge_apex_variations(&all.apex_infos).0
    }
}

fn unique_apex_variations(am: &dyn ApexModule) -> bool {
    am.unique_apex_variations() || am.apex_module_base().unique_apex_variations_for_deps()
}

fn apex_variations_of(base: &BaseModuleContext<'_>, id: ModuleId) -> BTreeSet<String> {
    base.other_module_provider(id, &ALL_APEX_INFO_PROVIDER)
        .map(|all| {
            all.apex_infos
                .iter()
                .flat_map(|i| i.in_apex_variants.iter().cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// A module needs one variant per APEX when a dependency in one of its
/// APEXes does.
pub(crate) fn apex_unique_variations_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    if !ctx.module().base().enabled || ctx.module().as_apex_module().is_none() {
        return;
    }
    let base = ctx.base();
    let own = apex_variations_of(&base, base.module_id());
    let mut unique = false;
    base.visit_direct_deps(|dep| {
        let Some(dep_am) = dep.module.as_apex_module() else {
            return;
        };
        let dep_apexes = apex_variations_of(&base, dep.id);
        if !own.is_disjoint(&dep_apexes) && unique_apex_variations(dep_am) {
            unique = true;
        }
    });
    if unique {
        if let Some(am) = ctx.module_mut().as_apex_module_mut() {
            am.apex_module_base_mut()
                .properties
                .unique_apex_variations_for_deps = true;
        }
    }
}

/// Marks modules that cannot be installed on the platform, either because
/// their `apex_available` leaves the platform out or because a dependency in
/// the same APEX is not available to it.
pub(crate) fn mark_platform_availability_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    // Recovery is not the platform.
    if ctx.module().base().install_in_recovery() {
        return;
    }
    let Some(am) = ctx.module().as_apex_module() else {
        return;
    };
    let mut available = am
        .apex_module_base()
        .available_for(AVAILABLE_TO_PLATFORM);
    let base = ctx.base();
    base.visit_direct_deps(|dep| {
        if !is_dep_in_same_apex(base.module(), dep.module, dep.tag) {
            return;
        }
        if dep
            .module
            .as_apex_module()
            .is_some_and(|d| d.apex_module_base().not_available_for_platform())
        {
            available = false;
        }
    });
    if am.always_requires_platform_apex_variant() {
        available = true;
    }
    if !available {
        if let Some(am) = ctx.module_mut().as_apex_module_mut() {
            am.apex_module_base_mut().set_not_available_for_platform();
        }
    }
}

/// Splits APEX bundles and the modules they contain by APEX.
///
/// Contained modules get a platform variant plus one variant per merged
/// group of APEXes.
pub struct ApexTransitionMutator;

impl TransitionInfoMutator for ApexTransitionMutator {
    type Info = ApexInfo;

    fn split(&self, ctx: &BaseModuleContext<'_>) -> Vec<ApexInfo> {
        if let Some(bundle) = ctx.module().as_apex_bundle() {
            return vec![generate_apex_info(bundle, ctx)];
        }
        let mut infos = vec![ApexInfo::default()];
        if let Some(am) = ctx.module().as_apex_module() {
            if am.apex_module_base().can_have_apex_variants() {
                infos.extend(apex_variant_infos(ctx, am));
            }
        }
        infos
    }

    fn outgoing_transition(
        &self,
        ctx: &OutgoingTransitionContext<'_>,
        source: &ApexInfo,
    ) -> ApexInfo {
        if ctx.dep_tag().exclude_from_apex_contents() {
            return ApexInfo::default();
        }
        source.clone()
    }

    fn incoming_transition(
        &self,
        ctx: &IncomingTransitionContext<'_>,
        incoming: &ApexInfo,
    ) -> ApexInfo {
        if let Some(bundle) = ctx.module().as_apex_bundle() {
            return generate_apex_info(bundle, ctx);
        }
        let Some(am) = ctx.module().as_apex_module() else {
            return ApexInfo::default();
        };
        let variation = incoming_apex_transition(ctx, am, &incoming.apex_variation_name);
        if variation.is_empty() {
            return ApexInfo::default();
        }
        apex_variant_infos(ctx, am)
            .into_iter()
            .find(|i| i.apex_variation_name == variation)
            .unwrap_or_else(|| incoming.clone())
    }

    fn mutate(&self, ctx: &mut BottomUpMutatorContext<'_>, info: &ApexInfo) {
        if let Some(bundle) = ctx.module_mut().as_apex_bundle_mut() {
            bundle.set_apex_variation_name(&info.apex_variation_name);
            return;
        }
        if ctx.module().as_apex_module().is_some() {
            mutate_apex_variant(ctx, info);
        }
    }

    fn transition_info_from_variation(&self, _variation: &str) -> ApexInfo {
        panic!("adding dependencies on explicit apex variations is not supported");
    }
}

/// The variation of `am` a dependency asking for `incoming` gets.
fn incoming_apex_transition(
    ctx: &IncomingTransitionContext<'_>,
    am: &dyn ApexModule,
    incoming: &str,
) -> String {
    // Platform variants depend on platform variants.
    if incoming.is_empty() {
        return String::new();
    }
    let apex_infos = ctx
        .provider(&ALL_APEX_INFO_PROVIDER)
        .map(|all| all.apex_infos.clone())
        .unwrap_or_default();
    if apex_infos.is_empty() {
        // A dependency added after the split keeps the variation it asked
        // for; during the split an uncontained module stays on the platform.
        return if ctx.is_adding_dependency() {
            incoming.to_owned()
        } else {
            String::new()
        };
    }
    let (apex_infos, aliases) = if unique_apex_variations(am) {
        (apex_infos, Vec::new())
    } else {
        merge_apex_variations(&apex_infos)
    };
    if let Some((_, merged)) = aliases.iter().find(|(original, _)| original == incoming) {
        return merged.clone();
    }
    if apex_infos.iter().any(|i| i.apex_variation_name == incoming) {
        return incoming.to_owned();
    }
    String::new()
}

fn mutate_apex_variant(ctx: &mut BottomUpMutatorContext<'_>, info: &ApexInfo) {
    let Some(all) = ctx.provider(&ALL_APEX_INFO_PROVIDER) else {
        return;
    };
    let base = ctx.base();
    let Some(am) = base.module().as_apex_module() else {
        return;
    };
    check_apex_available_property(&base, &am.apex_module_base().properties.apex_available);

    let apex_infos = if unique_apex_variations(am) {
        all.apex_infos.clone()
    } else {
        merge_apex_variations(&all.apex_infos).0
    };
    let module_name = base.module_name();
    let in_apex = apex_infos
        .iter()
        .flat_map(|i| i.apex_contents.iter())
        .fold(ApexMembership::NotInApex, |m, contents| {
            m.merge(contents.membership(module_name))
        });
    let test_apexes: Vec<String> = apex_infos
        .iter()
        .flat_map(|i| i.test_apexes.iter().cloned())
        .collect();
    let for_platform = info.is_for_platform();
    let uninstallable = for_platform
        && !base.host()
        && !am.apex_module_base().available_for(AVAILABLE_TO_PLATFORM)
        && am.apex_module_base().not_available_for_platform();

    if !for_platform {
        let this = apex_infos
            .iter()
            .find(|i| i.apex_variation_name == info.apex_variation_name)
            .unwrap_or_else(|| {
                panic!(
                    "failed to find apexInfo for incoming variation {:?}",
                    info.apex_variation_name
                )
            });
        ctx.set_provider(&APEX_INFO_PROVIDER, this.clone());
    }

    let module = ctx.module_mut();
    if uninstallable {
        module.base_mut().make_uninstallable();
    }
    if let Some(am) = module.as_apex_module_mut() {
        let props = &mut am.apex_module_base_mut().properties;
        props.in_any_apex = true;
        props.directly_in_any_apex = in_apex == ApexMembership::DirectlyInApex;
        props.test_apexes = test_apexes;
    }
}

/// Copies APEX membership along chains of copy-directly edges and makes the
/// module's variants agree on whether any of them is directly in an APEX.
///
/// Writes to other modules, so it runs sequentially.
pub(crate) fn apex_directly_in_any_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    if !ctx.module().base().enabled {
        return;
    }
    let Some(am) = ctx.module().as_apex_module() else {
        return;
    };
    let directly = am.apex_module_base().directly_in_any_apex();
    let in_any = am.apex_module_base().in_any_apex();

    let mut copy_to = Vec::new();
    ctx.base().walk_deps(|step| {
        if !step.child.tag.copy_directly_in_any_apex()
            || step.child.module.as_apex_module().is_none()
        {
            return false;
        }
        copy_to.push(step.child.id);
        true
    });
    for dep in copy_to {
        ctx.with_other_module_mut(dep, |m| {
            if let Some(dep_am) = m.as_apex_module_mut() {
                let props = &mut dep_am.apex_module_base_mut().properties;
                props.directly_in_any_apex = directly;
                props.in_any_apex = in_any;
            }
        });
    }

    if directly {
        let mut variants = Vec::new();
        ctx.visit_all_module_variants(|id, _| variants.push(id));
        let own = ctx.module_id();
        for variant in variants {
            if variant == own {
                if let Some(am) = ctx.module_mut().as_apex_module_mut() {
                    am.apex_module_base_mut()
                        .properties
                        .any_variant_directly_in_any_apex = true;
                }
            } else {
                ctx.with_other_module_mut(variant, |m| {
                    if let Some(am) = m.as_apex_module_mut() {
                        am.apex_module_base_mut()
                            .properties
                            .any_variant_directly_in_any_apex = true;
                    }
                });
            }
        }
    }
}

/// Final checks of APEX bundles and of modules that check their own
/// min_sdk_version.
pub(crate) fn apex_checks_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    if !ctx.module().base().enabled {
        return;
    }
    let base = ctx.base();
    if let Some(checked) = base.module().as_min_sdk_version_checked() {
        checked.check_min_sdk_version(&base);
    }
    let Some(bundle) = base.module().as_apex_bundle() else {
        return;
    };
    check_apex_availability(&base, bundle);
    let min_sdk_version = bundle.min_sdk_version(&base);
    if !bundle.is_test_apex() {
        check_min_sdk_version(&base, &min_sdk_version);
    }
    let dep_infos = build_apex_dependency_info(&base);
    let deps_info = build_deps_info_lists(
        base.module_name(),
        &min_sdk_version.to_string(),
        &dep_infos,
        &base.config().soong_out_dir().join(".intermediates"),
    );
    ctx.set_provider(&APEX_BUNDLE_DEPS_INFO_PROVIDER, deps_info);
}

/// Reports payload modules that do not list the bundle in `apex_available`.
fn check_apex_availability(ctx: &BaseModuleContext<'_>, bundle: &dyn ApexBundle) {
    if bundle.is_test_apex() {
        return;
    }
    // Bundles outside of system partitions cannot be named in apex_available.
    let props = &ctx.module().base().props;
    if ctx.module().base().soc_specific() || props.device_specific || props.product_specific {
        return;
    }
    // Coverage builds add runtime libraries nobody lists.
    let config = ctx.config();
    if config.is_env_true("EMMA_INSTRUMENT")
        || config.native_coverage_enabled()
        || config.clang_coverage_enabled()
    {
        return;
    }
    let apex_name = bundle
        .apex_available_name()
        .unwrap_or(bundle.apex_variation_name())
        .to_owned();
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
        if dep.to_apex.apex_module_base().available_for(&apex_name) {
            return true;
        }
        let from_name = dep.from_module.name();
        let to_name = dep.to_module.name();
        ctx.module_error(format!(
            "{:?} requires {:?} that doesn't list the APEX under 'apex_available'.\n\nDependency path: {}\n\nConsider adding {:?} to 'apex_available' property of {:?}",
            from_name,
            to_name,
            ctx.path_string(dep.path, true),
            apex_name,
            to_name,
        ));
        true
    });
}
