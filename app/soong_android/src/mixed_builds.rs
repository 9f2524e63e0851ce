/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Modules whose outputs can be built by Bazel instead.
//!
//! Enabled modules queue their cquery requests in `mixed_builds_prep`. Bazel
//! is invoked once after all mutators ran, and the modules then read their
//! results back.

use std::collections::BTreeSet;

use dupe::Dupe;
use gazebo::variants::VariantName;
use soong_bazel::context::BazelContext;
use soong_bazel::cquery::ConfigKey;
use soong_bazel::cquery::OsType;
use soong_bazel::cquery::RequestType;

use crate::context::BaseModuleContext;
use crate::context::BottomUpMutatorContext;
use crate::graph::ModuleGraph;
use crate::module::ArchType;
use crate::module::Os;
use crate::module::OsClass;
use crate::mutator::RegisterMutatorsContext;
use crate::provider::ProviderKey;

pub const MIXED_BUILDS_PREP_MUTATOR_NAME: &str = "mixed_builds_prep";

/// Implemented by modules that can take their outputs from Bazel.
pub trait MixedBuildBuildable: Send + Sync {
    /// The Bazel target that builds the module.
    fn bazel_label(&self) -> String;

    /// Whether this module type supports being built by Bazel at all.
    fn is_mixed_build_supported(&self, ctx: &BaseModuleContext<'_>) -> bool;

    /// Queues the requests whose results
    /// [`MixedBuildBuildable::process_bazel_query_response`] reads.
    fn queue_bazel_call(&self, ctx: &BaseModuleContext<'_>, bazel: &dyn BazelContext) {
        bazel.queue_bazel_request(
            &self.bazel_label(),
            RequestType::GetOutputFiles,
            config_key_for(ctx),
        );
    }

    /// Called after Bazel ran, instead of building the module's outputs.
    fn process_bazel_query_response(
        &mut self,
        bazel: &dyn BazelContext,
        config: ConfigKey,
    ) -> anyhow::Result<()>;
}

/// Why a mixed-build capable module is or isn't built by Bazel.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq, VariantName)]
pub enum MixedBuildDecision {
    Enabled,
    MixedBuildsDisabled,
    /// No Bazel toolchain for the module's os.
    UnsupportedOs,
    ModuleDisabled,
    NotAllowlisted,
}

pub static MIXED_BUILD_DECISION_PROVIDER: ProviderKey<MixedBuildDecision> =
    ProviderKey::new_mutator_provider("MixedBuildDecision", MIXED_BUILDS_PREP_MUTATOR_NAME);

/// The configuration the visited module is requested in.
pub fn config_key_for(ctx: &BaseModuleContext<'_>) -> ConfigKey {
    config_key(ctx.arch(), ctx.os())
}

pub fn config_key(arch: ArchType, os: Os) -> ConfigKey {
    ConfigKey {
        arch: arch.to_string(),
        os: OsType {
            name: os.to_string(),
            device: os.class() == OsClass::Device,
        },
    }
}

pub fn mixed_build_decision(ctx: &BaseModuleContext<'_>) -> MixedBuildDecision {
    if !ctx.config().is_mixed_builds_enabled() {
        return MixedBuildDecision::MixedBuildsDisabled;
    }
    if matches!(ctx.os(), Os::Windows | Os::LinuxBionic) {
        return MixedBuildDecision::UnsupportedOs;
    }
    if !ctx.module().base().enabled {
        return MixedBuildDecision::ModuleDisabled;
    }
    match ctx.bazel_context() {
        Some(bazel) if bazel.bazel_allowlisted(ctx.module_name()) => MixedBuildDecision::Enabled,
        _ => MixedBuildDecision::NotAllowlisted,
    }
}

pub fn mixed_builds_enabled(ctx: &BaseModuleContext<'_>) -> bool {
    mixed_build_decision(ctx) == MixedBuildDecision::Enabled
}

fn mixed_builds_prepare_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    if !ctx.module().base().enabled {
        return;
    }
    let base = ctx.base();
    let Some(m) = ctx.module().as_mixed_build_buildable() else {
        return;
    };
    if !m.is_mixed_build_supported(&base) {
        return;
    }
    let decision = mixed_build_decision(&base);
    tracing::debug!(
        "Mixed build decision for {}: {}",
        base.module_string(),
        decision.variant_name()
    );
    if decision == MixedBuildDecision::Enabled {
        if let Some(bazel) = base.bazel_context() {
            m.queue_bazel_call(&base, &**bazel);
        }
    }
    ctx.set_provider(&MIXED_BUILD_DECISION_PROVIDER, decision);
}

pub fn register_mixed_builds_mutator(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up(MIXED_BUILDS_PREP_MUTATOR_NAME, mixed_builds_prepare_mutator)
        .parallel();
}

fn process_bazel_query_response_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    if ctx.provider(&MIXED_BUILD_DECISION_PROVIDER) != Some(MixedBuildDecision::Enabled) {
        return;
    }
    let Some(bazel) = ctx.base().bazel_context().cloned() else {
        return;
    };
    let config = config_key_for(&ctx.base());
    let result = match ctx.module_mut().as_mixed_build_buildable_mut() {
        Some(m) => m.process_bazel_query_response(&*bazel, config),
        None => Ok(()),
    };
    if let Err(e) = result {
        ctx.module_error(format!("{:#}", e));
    }
}

/// Hands the Bazel results to every enabled module. Bazel must have been
/// invoked.
pub fn process_bazel_query_responses(graph: &ModuleGraph) -> anyhow::Result<()> {
    graph.run_visit(
        "mixed_builds_process",
        &process_bazel_query_response_mutator,
        true,
        false,
    )?;
    graph.errors().take_result()?;
    Ok(())
}

/// Module names by mixed build decision, for metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixedBuildsInfo {
    pub enabled_modules: BTreeSet<String>,
    pub disabled_modules: BTreeSet<String>,
}

pub fn mixed_builds_info(graph: &ModuleGraph) -> MixedBuildsInfo {
    let mut info = MixedBuildsInfo::default();
    for id in graph.all_variants() {
        let Some(decision) = graph.provider(id, &MIXED_BUILD_DECISION_PROVIDER) else {
            continue;
        };
        let name = graph.module_name(id).to_owned();
        if decision == MixedBuildDecision::Enabled {
            info.enabled_modules.insert(name);
        } else {
            info.disabled_modules.insert(name);
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_key() {
        let key = config_key(ArchType::Arm64, Os::Android);
        assert_eq!("arm64", key.arch);
        assert_eq!("android", key.os.name);
        assert!(key.os.device);

        let key = config_key(ArchType::Common, Os::LinuxGlibc);
        assert_eq!("common", key.arch);
        assert!(!key.os.device);
    }

    #[test]
    fn test_decision_names() {
        assert_eq!("Enabled", MixedBuildDecision::Enabled.variant_name());
        assert_eq!(
            "NotAllowlisted",
            MixedBuildDecision::NotAllowlisted.variant_name()
        );
    }
}
