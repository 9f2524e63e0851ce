/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Modules, their common properties, and the tags on dependency edges.
//!
//! Optional behaviours (APEX membership, image variants, mixed builds, ...)
//! are capabilities: a module opts in by returning itself from the matching
//! `as_*` method.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use allocative::Allocative;
use dupe::Dupe;

use crate::apex::ApexBundle;
use crate::apex::ApexModule;
use crate::apex::ModuleWithMinSdkVersionCheck;
use crate::image::ImageInterface;
use crate::mixed_builds::MixedBuildBuildable;
use crate::packaging::PackageModule;
use crate::packaging::PackagingSpec;

/// Index of a module variant in the graph.
#[derive(
    Debug,
    Clone,
    Copy,
    Dupe,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display
)]
#[display("ModuleId({})", _0)]
pub struct ModuleId(pub(crate) usize);

/// One entry of a variant's variation list: the value chosen by a mutator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Allocative)]
pub struct Variation {
    pub mutator: String,
    pub variation: String,
}

impl Variation {
    pub fn new(mutator: &str, variation: &str) -> Variation {
        Variation {
            mutator: mutator.to_owned(),
            variation: variation.to_owned(),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Dupe,
    PartialEq,
    Eq,
    Hash,
    Default,
    derive_more::Display,
    Allocative
)]
pub enum Os {
    #[default]
    #[display("android")]
    Android,
    #[display("linux_glibc")]
    LinuxGlibc,
    #[display("linux_bionic")]
    LinuxBionic,
    #[display("darwin")]
    Darwin,
    #[display("windows")]
    Windows,
    #[display("common_os")]
    CommonOs,
}

#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq, Hash, Allocative)]
pub enum OsClass {
    Device,
    Host,
}

impl Os {
    pub fn class(self) -> OsClass {
        match self {
            Os::Android => OsClass::Device,
            _ => OsClass::Host,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Dupe,
    PartialEq,
    Eq,
    Hash,
    Default,
    derive_more::Display,
    Allocative
)]
pub enum ArchType {
    #[default]
    #[display("common")]
    Common,
    #[display("arm")]
    Arm,
    #[display("arm64")]
    Arm64,
    #[display("x86")]
    X86,
    #[display("x86_64")]
    X86_64,
}

impl ArchType {
    pub fn multilib(self) -> &'static str {
        match self {
            ArchType::Common => "common",
            ArchType::Arm | ArchType::X86 => "lib32",
            ArchType::Arm64 | ArchType::X86_64 => "lib64",
        }
    }
}

/// Partition-related properties every module has.
#[derive(Debug, Clone, Default, Allocative)]
pub struct CommonProperties {
    pub vendor: bool,
    pub proprietary: bool,
    pub soc_specific: bool,
    pub device_specific: bool,
    pub product_specific: bool,
    pub system_ext_specific: bool,
    pub install_in_recovery: bool,
}

/// State shared by all module types.
#[derive(Debug, Clone, Allocative)]
pub struct ModuleBase {
    name: String,
    pub os: Os,
    pub arch: ArchType,
    pub enabled: bool,
    pub props: CommonProperties,
    /// Extra targets packaged alongside the module's own arch.
    pub multi_targets: Vec<ArchType>,
    uninstallable: bool,
    image_variation: String,
    debug_mutators: Vec<String>,
    debug_variations: Vec<String>,
}

impl ModuleBase {
    pub fn new(name: &str) -> ModuleBase {
        ModuleBase {
            name: name.to_owned(),
            os: Os::Android,
            arch: ArchType::Common,
            enabled: true,
            props: CommonProperties::default(),
            multi_targets: Vec::new(),
            uninstallable: false,
            image_variation: String::new(),
            debug_mutators: Vec::new(),
            debug_variations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn host(&self) -> bool {
        self.os.class() == OsClass::Host
    }

    pub fn make_uninstallable(&mut self) {
        self.uninstallable = true;
    }

    pub fn is_uninstallable(&self) -> bool {
        self.uninstallable
    }

    pub fn soc_specific(&self) -> bool {
        self.props.vendor || self.props.proprietary || self.props.soc_specific
    }

    pub fn install_in_recovery(&self) -> bool {
        self.props.install_in_recovery
    }

    pub fn image_variation(&self) -> &str {
        &self.image_variation
    }

    pub(crate) fn set_image_variation(&mut self, variation: &str) {
        self.image_variation = variation.to_owned();
    }

    /// Mutators that created a non-empty variation of this module, in order.
    pub fn debug_mutators(&self) -> &[String] {
        &self.debug_mutators
    }

    pub fn debug_variations(&self) -> &[String] {
        &self.debug_variations
    }

    pub(crate) fn record_variation(&mut self, mutator: &str, variation: &str) {
        self.debug_mutators.push(mutator.to_owned());
        self.debug_variations.push(variation.to_owned());
    }
}

/// A node of the module graph.
///
/// The graph owns one boxed module per variant; `clone_module` creates the
/// state of a new variant when a module is split.
pub trait Module: Any + Send + Sync {
    fn base(&self) -> &ModuleBase;

    fn base_mut(&mut self) -> &mut ModuleBase;

    fn clone_module(&self) -> Box<dyn Module>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn module_type(&self) -> &'static str;

    fn name(&self) -> &str {
        self.base().name()
    }

    /// Dependencies added when the graph's deps phase runs.
    fn declared_deps(&self) -> Vec<(Arc<dyn DependencyTag>, String)> {
        Vec::new()
    }

    fn as_apex_module(&self) -> Option<&dyn ApexModule> {
        None
    }

    fn as_apex_module_mut(&mut self) -> Option<&mut dyn ApexModule> {
        None
    }

    fn as_apex_bundle(&self) -> Option<&dyn ApexBundle> {
        None
    }

    fn as_apex_bundle_mut(&mut self) -> Option<&mut dyn ApexBundle> {
        None
    }

    fn as_image_interface(&self) -> Option<&dyn ImageInterface> {
        None
    }

    fn as_image_interface_mut(&mut self) -> Option<&mut dyn ImageInterface> {
        None
    }

    fn as_min_sdk_version_checked(&self) -> Option<&dyn ModuleWithMinSdkVersionCheck> {
        None
    }

    fn as_mixed_build_buildable(&self) -> Option<&dyn MixedBuildBuildable> {
        None
    }

    fn as_mixed_build_buildable_mut(&mut self) -> Option<&mut dyn MixedBuildBuildable> {
        None
    }

    fn as_package_module(&self) -> Option<&dyn PackageModule> {
        None
    }

    /// Files the module installs. Owner and arch are filled in by the
    /// `install_files` mutator.
    fn packaging_specs(&self) -> Vec<PackagingSpec> {
        Vec::new()
    }
}

impl dyn Module {
    pub fn downcast_ref<T: Module>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: Module>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.module_type(), self.name())
    }
}

/// The kind of a dependency edge. Capabilities default to off.
pub trait DependencyTag: Send + Sync + fmt::Debug + 'static {
    /// The dependency is never part of an APEX that contains the depender,
    /// e.g. a stub library.
    fn exclude_from_apex_contents(&self) -> bool {
        false
    }

    /// The dependency needs an APEX variant for every APEX variant of the
    /// depender.
    fn always_require_apex_variant(&self) -> bool {
        false
    }

    /// Direct APEX membership of the depender propagates to the dependency.
    fn copy_directly_in_any_apex(&self) -> bool {
        false
    }

    fn skip_apex_allowed_dependencies_check(&self) -> bool {
        false
    }

    /// Whether the dependency contributes to an APEX payload. Only bundle
    /// dependencies such as keys or certificates opt out.
    fn is_apex_payload(&self) -> bool {
        true
    }

    /// The dependency's installed files are packaged by the depender.
    fn is_packaging_item(&self) -> bool {
        false
    }

    /// Packaged files win over regular ones installed at the same path.
    fn is_high_priority(&self) -> bool {
        false
    }

    /// The dependency's installed files are installed along with the
    /// depender's.
    fn install_dep_needed(&self) -> bool {
        false
    }
}

/// A tag with no capabilities, identified by name.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq)]
pub struct NamedDependencyTag(pub &'static str);

impl DependencyTag for NamedDependencyTag {}

/// Edge to a library used through its stubs.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq)]
pub struct StubsDependencyTag;

impl DependencyTag for StubsDependencyTag {
    fn exclude_from_apex_contents(&self) -> bool {
        true
    }
}

/// Edge whose dependency follows the depender into every APEX directly.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq)]
pub struct CopyDirectlyDependencyTag;

impl DependencyTag for CopyDirectlyDependencyTag {
    fn copy_directly_in_any_apex(&self) -> bool {
        true
    }

    fn always_require_apex_variant(&self) -> bool {
        true
    }
}

pub fn named_tag(name: &'static str) -> Arc<dyn DependencyTag> {
    Arc::new(NamedDependencyTag(name))
}
