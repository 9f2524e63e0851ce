/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Module types for tests.

use std::any::Any;
use std::sync::Arc;

use soong_bazel::context::BazelContext;
use soong_bazel::cquery::ConfigKey;
use soong_core::api_level::ApiLevel;
use soong_core::config::BuildConfig;
use soong_core::errors::BuildErrors;

use crate::apex::min_sdk::min_sdk_version_from_value;
use crate::apex::ApexBundle;
use crate::apex::ApexModule;
use crate::apex::ApexModuleBase;
use crate::context::BaseModuleContext;
use crate::graph::ModuleGraph;
use crate::image;
use crate::image::ImageInterface;
use crate::image::ImageInterfaceContext;
use crate::image::ModuleKind;
use crate::mixed_builds::MixedBuildBuildable;
use crate::module::DependencyTag;
use crate::module::Module;
use crate::module::ModuleBase;
use crate::module::ModuleId;
use crate::module::NamedDependencyTag;
use crate::mutator::MutatorRegistry;
use crate::packaging::PackageModule;
use crate::packaging::PackagingBase;
use crate::packaging::PackagingSpec;

/// Boxes each module for [`run_graph`].
macro_rules! modules {
    ($($module:expr),* $(,)?) => {
        vec![$(Box::new($module) as Box<dyn $crate::module::Module>),*]
    };
}

pub(crate) use modules;

/// A library-like module. Every capability is off until a builder method
/// turns it on.
#[derive(Clone)]
pub(crate) struct TestModule {
    base: ModuleBase,
    apex: Option<ApexModuleBase>,
    deps: Vec<(Arc<dyn DependencyTag>, String)>,
    min_sdk_version: String,
    test_for: Vec<String>,
    unique_apex_variations: bool,
    images: Option<Vec<&'static str>>,
    installs: Vec<PackagingSpec>,
    packaging: Option<PackagingBase>,
    bazel_label: Option<String>,
    pub(crate) module_kind: Option<ModuleKind>,
    pub(crate) image_variation: Option<String>,
    pub(crate) bazel_outputs: Vec<String>,
}

impl TestModule {
    pub(crate) fn new(name: &str) -> TestModule {
        TestModule {
            base: ModuleBase::new(name),
            apex: None,
            deps: Vec::new(),
            min_sdk_version: String::new(),
            test_for: Vec::new(),
            unique_apex_variations: false,
            images: None,
            installs: Vec::new(),
            packaging: None,
            bazel_label: None,
            module_kind: None,
            image_variation: None,
            bazel_outputs: Vec::new(),
        }
    }

    pub(crate) fn apex_available(mut self, apexes: &[&str]) -> TestModule {
        self.apex = Some(ApexModuleBase::new(
            apexes.iter().map(|a| (*a).to_owned()).collect(),
        ));
        self
    }

    pub(crate) fn dep(self, name: &str) -> TestModule {
        self.dep_with_tag(Arc::new(NamedDependencyTag("shared_libs")), name)
    }

    pub(crate) fn dep_with_tag(mut self, tag: Arc<dyn DependencyTag>, name: &str) -> TestModule {
        self.deps.push((tag, name.to_owned()));
        self
    }

    pub(crate) fn min_sdk(mut self, version: &str) -> TestModule {
        self.min_sdk_version = version.to_owned();
        self
    }

    pub(crate) fn test_for(mut self, apexes: &[&str]) -> TestModule {
        self.test_for = apexes.iter().map(|a| (*a).to_owned()).collect();
        self
    }

    pub(crate) fn unique_apex_variations(mut self) -> TestModule {
        self.unique_apex_variations = true;
        self
    }

    /// The image variations the module asks for.
    pub(crate) fn images(mut self, variations: &[&'static str]) -> TestModule {
        self.images = Some(variations.to_vec());
        self
    }

    pub(crate) fn installs(mut self, spec: PackagingSpec) -> TestModule {
        self.installs.push(spec);
        self
    }

    pub(crate) fn packages(mut self, packaging: PackagingBase) -> TestModule {
        self.packaging = Some(packaging);
        self
    }

    pub(crate) fn bazel(mut self, label: &str) -> TestModule {
        self.bazel_label = Some(label.to_owned());
        self
    }

    pub(crate) fn with_base(mut self, f: impl FnOnce(&mut ModuleBase)) -> TestModule {
        f(&mut self.base);
        self
    }

    fn needs_image(&self, variation: &str) -> bool {
        self.images
            .as_ref()
            .is_some_and(|images| images.iter().any(|i| *i == variation))
    }
}

impl Module for TestModule {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn clone_module(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn module_type(&self) -> &'static str {
        "test_module"
    }

    fn declared_deps(&self) -> Vec<(Arc<dyn DependencyTag>, String)> {
        self.deps.clone()
    }

    fn as_apex_module(&self) -> Option<&dyn ApexModule> {
        self.apex.as_ref().map(|_| self as &dyn ApexModule)
    }

    fn as_apex_module_mut(&mut self) -> Option<&mut dyn ApexModule> {
        if self.apex.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_image_interface(&self) -> Option<&dyn ImageInterface> {
        self.images.as_ref().map(|_| self as &dyn ImageInterface)
    }

    fn as_image_interface_mut(&mut self) -> Option<&mut dyn ImageInterface> {
        if self.images.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_mixed_build_buildable(&self) -> Option<&dyn MixedBuildBuildable> {
        self.bazel_label
            .as_ref()
            .map(|_| self as &dyn MixedBuildBuildable)
    }

    fn as_mixed_build_buildable_mut(&mut self) -> Option<&mut dyn MixedBuildBuildable> {
        if self.bazel_label.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_package_module(&self) -> Option<&dyn PackageModule> {
        self.packaging.as_ref().map(|_| self as &dyn PackageModule)
    }

    fn packaging_specs(&self) -> Vec<PackagingSpec> {
        self.installs.clone()
    }
}

impl ApexModule for TestModule {
    fn apex_module_base(&self) -> &ApexModuleBase {
        match &self.apex {
            Some(apex) => apex,
            None => panic!("{} is not an apex module", self.base.name()),
        }
    }

    fn apex_module_base_mut(&mut self) -> &mut ApexModuleBase {
        match &mut self.apex {
            Some(apex) => apex,
            None => panic!("{} is not an apex module", self.base.name()),
        }
    }

    fn test_for(&self) -> Vec<String> {
        self.test_for.clone()
    }

    fn unique_apex_variations(&self) -> bool {
        self.unique_apex_variations
    }

    fn should_support_sdk_version(
        &self,
        config: &BuildConfig,
        sdk_version: &ApiLevel,
    ) -> anyhow::Result<()> {
        if self.min_sdk_version.is_empty() {
            return Err(anyhow::anyhow!("min_sdk_version is not specified"));
        }
        let min_sdk_version = ApiLevel::from_user(&self.min_sdk_version, config.active_codenames())?;
        if min_sdk_version.greater_than(sdk_version) {
            return Err(anyhow::anyhow!("newer SDK({})", min_sdk_version));
        }
        Ok(())
    }

    fn min_sdk_version(&self, config: &BuildConfig) -> ApiLevel {
        ApiLevel::from_user(&self.min_sdk_version, config.active_codenames())
            .unwrap_or_else(|_| ApiLevel::none())
    }
}

impl ImageInterface for TestModule {
    fn image_mutator_begin(&mut self, kind: ModuleKind, _config: &BuildConfig) {
        self.module_kind = Some(kind);
    }

    fn core_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        self.needs_image(image::CORE_VARIATION)
    }

    fn ramdisk_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        self.needs_image(image::RAMDISK_VARIATION)
    }

    fn vendor_ramdisk_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        self.needs_image(image::VENDOR_RAMDISK_VARIATION)
    }

    fn debug_ramdisk_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        self.needs_image(image::DEBUG_RAMDISK_VARIATION)
    }

    fn recovery_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        self.needs_image(image::RECOVERY_VARIATION)
    }

    fn vendor_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        self.needs_image(image::VENDOR_VARIATION)
    }

    fn product_variant_needed(&self, _ctx: &ImageInterfaceContext<'_>) -> bool {
        self.needs_image(image::PRODUCT_VARIATION)
    }

    fn extra_image_variations(&self, _ctx: &ImageInterfaceContext<'_>) -> Vec<String> {
        const STANDARD: &[&str] = &[
            image::CORE_VARIATION,
            image::RAMDISK_VARIATION,
            image::VENDOR_RAMDISK_VARIATION,
            image::DEBUG_RAMDISK_VARIATION,
            image::RECOVERY_VARIATION,
            image::VENDOR_VARIATION,
            image::PRODUCT_VARIATION,
        ];
        self.images
            .iter()
            .flatten()
            .filter(|v| !STANDARD.contains(*v))
            .map(|v| (*v).to_owned())
            .collect()
    }

    fn set_image_variation(&mut self, variation: &str) {
        self.image_variation = Some(variation.to_owned());
    }
}

impl MixedBuildBuildable for TestModule {
    fn bazel_label(&self) -> String {
        self.bazel_label.clone().unwrap_or_default()
    }

    fn is_mixed_build_supported(&self, _ctx: &BaseModuleContext<'_>) -> bool {
        true
    }

    fn process_bazel_query_response(
        &mut self,
        bazel: &dyn BazelContext,
        config: ConfigKey,
    ) -> anyhow::Result<()> {
        self.bazel_outputs = bazel.get_output_files(&self.bazel_label(), config)?;
        Ok(())
    }
}

impl PackageModule for TestModule {
    fn packaging_base(&self) -> &PackagingBase {
        match &self.packaging {
            Some(packaging) => packaging,
            None => panic!("{} does not package anything", self.base.name()),
        }
    }
}

/// An APEX bundle containing its dependencies.
#[derive(Clone)]
pub(crate) struct TestApexBundle {
    base: ModuleBase,
    variation_name: String,
    deps: Vec<(Arc<dyn DependencyTag>, String)>,
    min_sdk_version: String,
    updatable: bool,
    use_platform_apis: bool,
    test_apex: bool,
    prebuilt: bool,
}

impl TestApexBundle {
    pub(crate) fn new(name: &str) -> TestApexBundle {
        TestApexBundle {
            base: ModuleBase::new(name),
            variation_name: name.to_owned(),
            deps: Vec::new(),
            min_sdk_version: String::new(),
            updatable: false,
            use_platform_apis: false,
            test_apex: false,
            prebuilt: false,
        }
    }

    pub(crate) fn dep(self, name: &str) -> TestApexBundle {
        self.dep_with_tag(Arc::new(NamedDependencyTag("native_shared_libs")), name)
    }

    pub(crate) fn dep_with_tag(
        mut self,
        tag: Arc<dyn DependencyTag>,
        name: &str,
    ) -> TestApexBundle {
        self.deps.push((tag, name.to_owned()));
        self
    }

    pub(crate) fn min_sdk(mut self, version: &str) -> TestApexBundle {
        self.min_sdk_version = version.to_owned();
        self
    }

    pub(crate) fn use_platform_apis(mut self) -> TestApexBundle {
        self.use_platform_apis = true;
        self
    }

    pub(crate) fn test_apex(mut self) -> TestApexBundle {
        self.test_apex = true;
        self
    }

    pub(crate) fn prebuilt(mut self) -> TestApexBundle {
        self.prebuilt = true;
        self
    }
}

impl Module for TestApexBundle {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn clone_module(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn module_type(&self) -> &'static str {
        "apex"
    }

    fn declared_deps(&self) -> Vec<(Arc<dyn DependencyTag>, String)> {
        self.deps.clone()
    }

    fn as_apex_bundle(&self) -> Option<&dyn ApexBundle> {
        Some(self)
    }

    fn as_apex_bundle_mut(&mut self) -> Option<&mut dyn ApexBundle> {
        Some(self)
    }
}

impl ApexBundle for TestApexBundle {
    fn apex_variation_name(&self) -> &str {
        &self.variation_name
    }

    fn set_apex_variation_name(&mut self, name: &str) {
        self.variation_name = name.to_owned();
    }

    fn min_sdk_version(&self, ctx: &BaseModuleContext<'_>) -> ApiLevel {
        min_sdk_version_from_value(ctx, &self.min_sdk_version)
    }

    fn updatable(&self) -> bool {
        self.updatable
    }

    fn use_platform_apis(&self) -> bool {
        self.use_platform_apis
    }

    fn is_test_apex(&self) -> bool {
        self.test_apex
    }

    fn for_prebuilt_apex(&self) -> bool {
        self.prebuilt
    }
}

pub(crate) fn test_config() -> BuildConfig {
    BuildConfig::new("out/soong")
}

/// Adds `modules` to a graph and runs the standard mutators over it.
pub(crate) fn run_graph(
    config: BuildConfig,
    modules: Vec<Box<dyn Module>>,
) -> anyhow::Result<ModuleGraph> {
    let mut graph = ModuleGraph::new(config);
    for module in modules {
        graph.add_module(module)?;
    }
    graph.run_mutators(&MutatorRegistry::with_standard_mutators())?;
    Ok(graph)
}

/// The errors of a run that was expected to fail.
pub(crate) fn run_graph_errors(config: BuildConfig, modules: Vec<Box<dyn Module>>) -> BuildErrors {
    match run_graph(config, modules) {
        Ok(_) => panic!("expected the analysis to fail"),
        Err(e) => match e.downcast::<BuildErrors>() {
            Ok(errors) => errors,
            Err(e) => panic!("expected module errors, got: {:#}", e),
        },
    }
}

/// The only variant of `name` matching `variations`.
pub(crate) fn variant(graph: &ModuleGraph, name: &str, variations: &[(&str, &str)]) -> ModuleId {
    match graph.variant(name, variations) {
        Some(id) => id,
        None => panic!(
            "no variant of {} matching {:?}, have: {:?}",
            name,
            variations,
            graph
                .module_variants(name)
                .into_iter()
                .map(|id| graph.module_string(id))
                .collect::<Vec<_>>()
        ),
    }
}

/// `module_string` of every variant of `name`.
pub(crate) fn variant_strings(graph: &ModuleGraph, name: &str) -> Vec<String> {
    graph
        .module_variants(name)
        .into_iter()
        .map(|id| graph.module_string(id))
        .collect()
}
