/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Packaging: placing the installed files of dependencies into a package,
//! such as a filesystem image or a zip of host tools.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::fmt::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use allocative::Allocative;
use dupe::Dupe;
use itertools::Itertools;

use crate::context::BaseModuleContext;
use crate::context::BottomUpMutatorContext;
use crate::module::ArchType;
use crate::module::DependencyTag;
use crate::mutator::RegisterMutatorsContext;
use crate::provider::ProviderKey;

/// A request to place a built file at a path inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Allocative)]
pub struct PackagingSpec {
    /// Relative to the root of the package.
    pub rel_path_in_package: String,
    pub src_path: PathBuf,
    /// When set, the entry is a symlink to this target and `src_path` is
    /// ignored.
    pub symlink_target: String,
    pub executable: bool,
    pub partition: String,
    /// Packaged without being installed.
    pub skip_install: bool,
    /// Arch of the module that produced the spec.
    pub arch_type: ArchType,
    /// Modules whose files this spec replaces.
    pub overrides: Vec<String>,
    /// Module that produced the spec.
    pub owner: String,
}

impl PackagingSpec {
    pub fn file(rel_path_in_package: &str, src_path: impl Into<PathBuf>) -> PackagingSpec {
        PackagingSpec {
            rel_path_in_package: rel_path_in_package.to_owned(),
            src_path: src_path.into(),
            ..PackagingSpec::default()
        }
    }

    pub fn symlink(rel_path_in_package: &str, target: &str) -> PackagingSpec {
        PackagingSpec {
            rel_path_in_package: rel_path_in_package.to_owned(),
            symlink_target: target.to_owned(),
            ..PackagingSpec::default()
        }
    }

    /// Whether both specs put the same thing at the same place. Owner, arch
    /// and overrides don't matter.
    pub fn equivalent(&self, other: &PackagingSpec) -> bool {
        self.rel_path_in_package == other.rel_path_in_package
            && self.src_path == other.src_path
            && self.symlink_target == other.symlink_target
            && self.executable == other.executable
            && self.partition == other.partition
    }

    pub fn file_name(&self) -> &str {
        Path::new(&self.rel_path_in_package)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }
}

impl fmt::Display for PackagingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.symlink_target.is_empty() {
            write!(
                f,
                "{} <- {}",
                self.rel_path_in_package,
                self.src_path.display()
            )?;
        } else {
            write!(
                f,
                "{} -> {}",
                self.rel_path_in_package, self.symlink_target
            )?;
        }
        if !self.owner.is_empty() {
            write!(f, " (owner: {}, arch: {})", self.owner, self.arch_type)?;
        }
        Ok(())
    }
}

/// The files a module installs, with those of its install dependencies.
#[derive(Debug, Clone, Default)]
pub struct InstallFilesInfo {
    pub packaging_specs: Vec<PackagingSpec>,
    pub transitive_packaging_specs: Arc<Vec<PackagingSpec>>,
}

pub static INSTALL_FILES_PROVIDER: ProviderKey<InstallFilesInfo> =
    ProviderKey::new_mutator_provider("InstallFilesInfo", "install_files");

/// What a package module ended up packaging, keyed by path in the package.
#[derive(Debug, Clone, Default)]
pub struct PackagedFilesInfo {
    pub specs: BTreeMap<String, PackagingSpec>,
}

pub static PACKAGED_FILES_PROVIDER: ProviderKey<PackagedFilesInfo> =
    ProviderKey::new_mutator_provider("PackagedFilesInfo", "packaging");

/// Tag of an edge whose dependency is packaged.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq, Default)]
pub struct PackagingItemDepTag;

impl DependencyTag for PackagingItemDepTag {
    fn is_packaging_item(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq)]
struct HighPriorityDepTag;

impl DependencyTag for HighPriorityDepTag {
    fn is_packaging_item(&self) -> bool {
        true
    }

    fn is_high_priority(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, Allocative)]
pub struct DepsProperty {
    /// Wins over other deps installing to the same path.
    pub high_priority_deps: Vec<String>,
    pub deps: Vec<String>,
}

impl DepsProperty {
    fn is_set(&self) -> bool {
        !self.deps.is_empty() || !self.high_priority_deps.is_empty()
    }
}

#[derive(Debug, Clone, Default, Allocative)]
pub struct MultilibDepsProperties {
    pub first: DepsProperty,
    pub common: DepsProperty,
    pub lib32: DepsProperty,
    pub lib64: DepsProperty,
    pub both: DepsProperty,
    pub prefer32: DepsProperty,
}

#[derive(Debug, Clone, Default, Allocative)]
pub struct ArchDepsProperties {
    pub arm64: DepsProperty,
    pub arm: DepsProperty,
    pub x86_64: DepsProperty,
    pub x86: DepsProperty,
}

#[derive(Debug, Clone, Default, Allocative)]
pub struct PackagingProperties {
    pub deps: DepsProperty,
    pub multilib: MultilibDepsProperties,
    pub arch: ArchDepsProperties,
}

/// Embedded by modules that package their dependencies.
#[derive(Debug, Clone, Default, Allocative)]
pub struct PackagingBase {
    pub properties: PackagingProperties,
    /// Skip deps that don't exist in this checkout.
    pub ignore_missing_dependencies: bool,
    /// `deps` only applies to the first of several targets.
    pub deps_collect_first_target_only: bool,
    pub allow_high_priority_deps: bool,
}

pub trait PackageModule: Send + Sync {
    fn packaging_base(&self) -> &PackagingBase;

    /// Tag of the edges to the packaged modules.
    fn packaging_dep_tag(&self) -> Arc<dyn DependencyTag> {
        Arc::new(PackagingItemDepTag)
    }

    /// The specs that end up in the package.
    fn gather_packaging_specs(&self, ctx: &BaseModuleContext<'_>) -> BTreeMap<String, PackagingSpec> {
        self.packaging_base().gather_packaging_specs(ctx)
    }
}

/// The module's own arch, common, and any extra targets.
fn supported_arches(ctx: &BaseModuleContext<'_>) -> Vec<ArchType> {
    let base = ctx.module().base();
    let mut arches = vec![base.arch];
    if base.arch != ArchType::Common {
        arches.push(ArchType::Common);
    }
    arches.extend(base.multi_targets.iter().copied());
    arches
}

fn supports_lib32(ctx: &BaseModuleContext<'_>) -> bool {
    supported_arches(ctx)
        .iter()
        .any(|a| a.multilib() == "lib32")
}

impl PackagingBase {
    /// The normal and high priority deps selected for `arch`.
    pub fn deps_for_arch(
        &self,
        ctx: &BaseModuleContext<'_>,
        arch: ArchType,
    ) -> (Vec<String>, Vec<String>) {
        let props = &self.properties;
        let mut normal = Vec::new();
        let mut high = Vec::new();
        let get = |prop: &DepsProperty, normal: &mut Vec<String>, high: &mut Vec<String>| {
            normal.extend(prop.deps.iter().cloned());
            high.extend(prop.high_priority_deps.iter().cloned());
        };
        let multi_targets = &ctx.module().base().multi_targets;

        if arch == ctx.arch() && multi_targets.is_empty() {
            get(&props.deps, &mut normal, &mut high);
        } else if arch.multilib() == "lib32" || arch.multilib() == "lib64" {
            let lib32 = arch.multilib() == "lib32";
            let prop = if lib32 {
                &props.multilib.lib32
            } else {
                &props.multilib.lib64
            };
            get(prop, &mut normal, &mut high);
            // prefer32 deps go to lib32 when there is a 32-bit target, and
            // to lib64 otherwise.
            if supports_lib32(ctx) == lib32 {
                let prefer32 = &props.multilib.prefer32;
                normal.extend(prefer32.deps.iter().cloned());
                high.extend(prefer32.high_priority_deps.iter().cloned());
            }
        } else if arch == ArchType::Common {
            get(&props.multilib.common, &mut normal, &mut high);
        }

        if self.deps_collect_first_target_only {
            if props.multilib.first.is_set() {
                ctx.property_error("multilib.first.deps", "not supported. use \"deps\" instead");
            }
            for (i, target) in multi_targets.iter().enumerate() {
                if *target == arch {
                    get(&props.multilib.both, &mut normal, &mut high);
                    if i == 0 {
                        get(&props.deps, &mut normal, &mut high);
                    }
                }
            }
        } else {
            if props.multilib.both.is_set() {
                ctx.property_error("multilib.both.deps", "not supported. use \"deps\" instead");
            }
            for (i, target) in multi_targets.iter().enumerate() {
                if *target == arch {
                    get(&props.deps, &mut normal, &mut high);
                    if i == 0 {
                        get(&props.multilib.first, &mut normal, &mut high);
                    }
                }
            }
        }

        if ctx.arch() == ArchType::Common {
            match arch {
                ArchType::Arm64 => get(&props.arch.arm64, &mut normal, &mut high),
                ArchType::Arm => get(&props.arch.arm, &mut normal, &mut high),
                ArchType::X86_64 => get(&props.arch.x86_64, &mut normal, &mut high),
                ArchType::X86 => get(&props.arch.x86, &mut normal, &mut high),
                ArchType::Common => {}
            }
        }

        if !high.is_empty() && !self.allow_high_priority_deps {
            ctx.module_error(format!(
                "Usage of high_priority_deps is not allowed for {} module type",
                ctx.module().module_type()
            ));
        }

        (
            normal.into_iter().unique().collect(),
            high.into_iter().unique().collect(),
        )
    }

    /// Every `(dep, high_priority)` pair over the supported targets, in
    /// order, without duplicates.
    pub fn packaging_deps(&self, ctx: &BaseModuleContext<'_>) -> Vec<(String, bool)> {
        let mut deps = Vec::new();
        for arch in supported_arches(ctx) {
            let (normal, high) = self.deps_for_arch(ctx, arch);
            deps.extend(normal.into_iter().map(|d| (d, false)));
            deps.extend(high.into_iter().map(|d| (d, true)));
        }
        deps.into_iter().unique().collect()
    }

    pub fn gather_packaging_specs(&self, ctx: &BaseModuleContext<'_>) -> BTreeMap<String, PackagingSpec> {
        self.gather_packaging_specs_with_filter_and_modifier(ctx, None, None)
    }

    pub fn gather_packaging_specs_with_filter(
        &self,
        ctx: &BaseModuleContext<'_>,
        filter: &dyn Fn(&PackagingSpec) -> bool,
    ) -> BTreeMap<String, PackagingSpec> {
        self.gather_packaging_specs_with_filter_and_modifier(ctx, Some(filter), None)
    }

    /// Collects the transitive specs of the packaged dependencies.
    ///
    /// Specs of other arches are dropped, as are specs owned by, or pulled
    /// in through, an overridden module. High priority deps win over the
    /// rest; two different specs for one path otherwise conflict.
    pub fn gather_packaging_specs_with_filter_and_modifier(
        &self,
        ctx: &BaseModuleContext<'_>,
        filter: Option<&dyn Fn(&PackagingSpec) -> bool>,
        modifier: Option<&dyn Fn(&mut PackagingSpec)>,
    ) -> BTreeMap<String, PackagingSpec> {
        let arches = supported_arches(ctx);
        // Each spec with the name of the dep that requested it.
        let mut regular: Vec<(PackagingSpec, String)> = Vec::new();
        let mut high: Vec<(PackagingSpec, String)> = Vec::new();
        let mut overridden: HashSet<String> = HashSet::new();

        ctx.visit_direct_deps(|dep| {
            if !dep.tag.is_packaging_item() {
                return;
            }
            let Some(info) = ctx.other_module_provider(dep.id, &INSTALL_FILES_PROVIDER) else {
                return;
            };
            for ps in info.transitive_packaging_specs.iter() {
                if !arches.contains(&ps.arch_type) {
                    continue;
                }
                if let Some(filter) = filter {
                    if !filter(ps) {
                        continue;
                    }
                }
                let mut ps = ps.clone();
                if let Some(modifier) = modifier {
                    modifier(&mut ps);
                }
                overridden.extend(ps.overrides.iter().cloned());
                let entry = (ps, dep.module.name().to_owned());
                if dep.tag.is_high_priority() {
                    high.push(entry);
                } else {
                    regular.push(entry);
                }
            }
        });

        let not_overridden = |(ps, dep_name): &(PackagingSpec, String)| {
            (ps.owner.is_empty() || !overridden.contains(&ps.owner))
                && !overridden.contains(dep_name)
        };

        let mut specs = BTreeMap::new();
        let insert = |specs: &mut BTreeMap<String, PackagingSpec>, ps: PackagingSpec| {
            match specs.get(&ps.rel_path_in_package) {
                Some(existing) => {
                    if !existing.equivalent(&ps) {
                        ctx.module_error(format!(
                            "packaging conflict at {}:\n{}\n{}",
                            ps.rel_path_in_package, existing, ps
                        ));
                    }
                }
                None => {
                    specs.insert(ps.rel_path_in_package.clone(), ps);
                }
            }
        };
        for (ps, _) in regular.into_iter().filter(|e| not_overridden(e)) {
            insert(&mut specs, ps);
        }
        let mut high_specs = BTreeMap::new();
        for (ps, _) in high.into_iter().filter(|e| not_overridden(e)) {
            insert(&mut high_specs, ps);
        }
        specs.extend(high_specs);
        specs
    }
}

/// A `preparer.sh` that copies packaging specs into directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparerScript {
    pub script: String,
    /// Paths in the package, in script order.
    pub entries: Vec<String>,
    /// Files the script copies.
    pub inputs: Vec<PathBuf>,
}

pub fn copy_specs_to_dir(specs: &BTreeMap<String, PackagingSpec>, dir: &Path) -> Option<PreparerScript> {
    let mut dirs_to_specs = BTreeMap::new();
    dirs_to_specs.insert(dir.to_path_buf(), specs.clone());
    copy_specs_to_dirs(&dirs_to_specs)
}

/// Renders the script for `dirs_to_specs`. Nothing to copy gives `None`.
pub fn copy_specs_to_dirs(
    dirs_to_specs: &BTreeMap<PathBuf, BTreeMap<String, PackagingSpec>>,
) -> Option<PreparerScript> {
    if dirs_to_specs.values().all(|specs| specs.is_empty()) {
        return None;
    }
    let mut script = String::from("set -e\n");
    let mut entries = Vec::new();
    let mut inputs = Vec::new();
    let mut seen_dirs = HashSet::new();
    for (dir, specs) in dirs_to_specs {
        for ps in specs.values() {
            let dest = dir.join(&ps.rel_path_in_package);
            let dest_dir = dest.parent().unwrap_or(dir).to_path_buf();
            entries.push(ps.rel_path_in_package.clone());
            // Writing to a String cannot fail.
            if seen_dirs.insert(dest_dir.clone()) {
                let _ = writeln!(script, "mkdir -p {}", dest_dir.display());
            }
            if ps.symlink_target.is_empty() {
                inputs.push(ps.src_path.clone());
                let _ = writeln!(script, "cp {} {}", ps.src_path.display(), dest.display());
            } else {
                let _ = writeln!(script, "ln -sf {} {}", ps.symlink_target, dest.display());
            }
            if ps.executable {
                let _ = writeln!(script, "chmod a+x {}", dest.display());
            }
        }
    }
    Some(PreparerScript {
        script,
        entries,
        inputs,
    })
}

/// Adds the edges to the modules a package module packages. Runs as part of
/// the deps mutator.
pub(crate) fn add_packaging_deps(ctx: &mut BottomUpMutatorContext<'_>) {
    let Some(pm) = ctx.module().as_package_module() else {
        return;
    };
    let tag = pm.packaging_dep_tag();
    let ignore_missing = pm.packaging_base().ignore_missing_dependencies;
    let deps = pm.packaging_base().packaging_deps(&ctx.base());
    for (dep, high_priority) in deps {
        if ignore_missing && !ctx.base().other_module_exists(&dep) {
            continue;
        }
        let tag: Arc<dyn DependencyTag> = if high_priority {
            Arc::new(HighPriorityDepTag)
        } else {
            tag.dupe()
        };
        ctx.add_dependency(tag, &dep);
    }
}

fn install_files_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    let module_base = ctx.module().base();
    let owner = module_base.name().to_owned();
    let arch = module_base.arch;
    let skip_install = module_base.is_uninstallable();
    let packaging_specs: Vec<PackagingSpec> = ctx
        .module()
        .packaging_specs()
        .into_iter()
        .map(|mut ps| {
            ps.owner = owner.clone();
            ps.arch_type = arch;
            ps.skip_install |= skip_install;
            ps
        })
        .collect();

    let mut transitive = packaging_specs.clone();
    let mut seen: HashSet<PackagingSpec> = transitive.iter().cloned().collect();
    let base = ctx.base();
    base.visit_direct_deps(|dep| {
        if !dep.tag.install_dep_needed() {
            return;
        }
        if let Some(info) = base.other_module_provider(dep.id, &INSTALL_FILES_PROVIDER) {
            for ps in info.transitive_packaging_specs.iter() {
                if seen.insert(ps.clone()) {
                    transitive.push(ps.clone());
                }
            }
        }
    });
    ctx.set_provider(
        &INSTALL_FILES_PROVIDER,
        InstallFilesInfo {
            packaging_specs,
            transitive_packaging_specs: Arc::new(transitive),
        },
    );
}

fn packaging_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    let Some(pm) = ctx.module().as_package_module() else {
        return;
    };
    let specs = pm.gather_packaging_specs(&ctx.base());
    tracing::debug!("{} packages {} files", ctx.module_name(), specs.len());
    ctx.set_provider(&PACKAGED_FILES_PROVIDER, PackagedFilesInfo { specs });
}

pub fn register_packaging_mutators(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("install_files", install_files_mutator)
        .parallel();
    ctx.bottom_up("packaging", packaging_mutator).parallel();
}
