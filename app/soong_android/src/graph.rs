/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The module graph.
//!
//! Modules live in an arena of variant nodes. Variants of one module form a
//! group that shares the module's name. Passes visit variants level by
//! level: a variant's level is one more than the highest level of its
//! dependencies, so all variants of a level can be visited concurrently.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use dupe::Dupe;
use indexmap::IndexMap;
use itertools::Itertools;
use parking_lot::Mutex;
use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;
use rayon::prelude::*;
use soong_bazel::context::BazelContext;
use soong_core::config::BuildConfig;
use soong_core::errors::ErrorCollector;
use starlark_map::small_map::SmallMap;

use crate::context::BaseModuleContext;
use crate::context::BottomUpMutatorContext;
use crate::context::IncomingTransitionContext;
use crate::context::OutgoingTransitionContext;
use crate::module::DependencyTag;
use crate::module::Module;
use crate::module::ModuleId;
use crate::module::Variation;
use crate::provider::ProviderKey;
use crate::provider::ProviderStore;
use crate::transition::AnyTransitionInfo;
use crate::transition::TransitionEntry;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("module {0:?} already exists")]
    DuplicateModule(String),
    #[error("dependency cycle: {0}")]
    Cycle(String),
}

pub(crate) type MutatorFn = dyn Fn(&mut BottomUpMutatorContext<'_>) + Send + Sync;

#[derive(Clone)]
pub(crate) struct DepEdge {
    pub(crate) tag: Arc<dyn DependencyTag>,
    pub(crate) target: ModuleId,
}

struct ModuleNode {
    group: usize,
    variations: Vec<Variation>,
    module: RwLock<Box<dyn Module>>,
    deps: Mutex<Vec<DepEdge>>,
    providers: ProviderStore,
    transition_infos: SmallMap<String, AnyTransitionInfo>,
}

#[derive(Debug)]
struct ModuleGroup {
    name: String,
    variants: Vec<ModuleId>,
}

pub struct ModuleGraph {
    config: BuildConfig,
    errors: ErrorCollector,
    nodes: Vec<ModuleNode>,
    groups: Vec<ModuleGroup>,
    names: HashMap<String, usize>,
    completed_transitions: Vec<Arc<TransitionEntry>>,
    bazel_context: Option<Arc<dyn BazelContext>>,
    pending_renames: Mutex<Vec<(usize, String)>>,
}

impl ModuleGraph {
    pub fn new(config: BuildConfig) -> ModuleGraph {
        ModuleGraph {
            config,
            errors: ErrorCollector::new(),
            nodes: Vec::new(),
            groups: Vec::new(),
            names: HashMap::new(),
            completed_transitions: Vec::new(),
            bazel_context: None,
            pending_renames: Mutex::new(Vec::new()),
        }
    }

    pub fn with_bazel_context(mut self, bazel_context: Arc<dyn BazelContext>) -> ModuleGraph {
        self.bazel_context = Some(bazel_context);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn errors(&self) -> &ErrorCollector {
        &self.errors
    }

    pub fn bazel_context(&self) -> Option<&Arc<dyn BazelContext>> {
        self.bazel_context.as_ref()
    }

    pub fn add_module(&mut self, module: Box<dyn Module>) -> anyhow::Result<ModuleId> {
        let name = module.name().to_owned();
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateModule(name).into());
        }
        let id = ModuleId(self.nodes.len());
        let group = self.groups.len();
        self.nodes.push(ModuleNode {
            group,
            variations: Vec::new(),
            module: RwLock::new(module),
            deps: Mutex::new(Vec::new()),
            providers: ProviderStore::default(),
            transition_infos: SmallMap::new(),
        });
        self.groups.push(ModuleGroup {
            name: name.clone(),
            variants: vec![id],
        });
        self.names.insert(name, group);
        Ok(id)
    }

    pub fn module_exists(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Module names in the order the modules were added.
    pub fn module_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn module_variants(&self, name: &str) -> Vec<ModuleId> {
        match self.names.get(name) {
            Some(group) => self.groups[*group].variants.clone(),
            None => Vec::new(),
        }
    }

    /// The first variant of `name` whose variations match every
    /// `(mutator, variation)` pair. Mutators a variant was not split by
    /// match the empty variation.
    pub fn variant(&self, name: &str, variations: &[(&str, &str)]) -> Option<ModuleId> {
        self.module_variants(name).into_iter().find(|id| {
            variations
                .iter()
                .all(|(mutator, variation)| self.variation(*id, mutator) == *variation)
        })
    }

    /// Every variant of every module, grouped by module.
    pub fn all_variants(&self) -> Vec<ModuleId> {
        self.groups
            .iter()
            .flat_map(|g| g.variants.iter().copied())
            .collect()
    }

    pub fn module_name(&self, id: ModuleId) -> &str {
        &self.groups[self.nodes[id.0].group].name
    }

    pub fn variations(&self, id: ModuleId) -> &[Variation] {
        &self.nodes[id.0].variations
    }

    pub fn variation(&self, id: ModuleId, mutator: &str) -> &str {
        self.nodes[id.0]
            .variations
            .iter()
            .find(|v| v.mutator == mutator)
            .map_or("", |v| v.variation.as_str())
    }

    /// `name{mutator:variation,...}`, leaving out empty variations.
    pub fn module_string(&self, id: ModuleId) -> String {
        let variations = format_variations(&self.nodes[id.0].variations);
        if variations.is_empty() {
            self.module_name(id).to_owned()
        } else {
            format!("{}{{{}}}", self.module_name(id), variations)
        }
    }

    pub fn with_module<R>(&self, id: ModuleId, f: impl FnOnce(&dyn Module) -> R) -> R {
        let guard = self.read_module(id);
        f(&**guard)
    }

    pub fn provider<T: Clone + Send + Sync + 'static>(
        &self,
        id: ModuleId,
        key: &ProviderKey<T>,
    ) -> Option<T> {
        self.nodes[id.0].providers.get(key)
    }

    pub fn direct_deps(&self, id: ModuleId) -> Vec<(ModuleId, Arc<dyn DependencyTag>)> {
        self.dep_edges(id)
            .into_iter()
            .map(|e| (e.target, e.tag))
            .collect()
    }

    pub(crate) fn set_provider<T: Send + Sync + 'static>(
        &self,
        id: ModuleId,
        key: &ProviderKey<T>,
        value: T,
        mutator: &str,
    ) {
        self.nodes[id.0].providers.set(key, value, mutator)
    }

    pub(crate) fn dep_edges(&self, id: ModuleId) -> Vec<DepEdge> {
        self.nodes[id.0].deps.lock().clone()
    }

    pub(crate) fn push_dep_edge(&self, id: ModuleId, tag: Arc<dyn DependencyTag>, target: ModuleId) {
        self.nodes[id.0].deps.lock().push(DepEdge { tag, target });
    }

    /// Shared access to a module. Recursive so that a walk may hold the
    /// guards of every module on its path.
    pub(crate) fn read_module(&self, id: ModuleId) -> RwLockReadGuard<'_, Box<dyn Module>> {
        self.nodes[id.0].module.read_recursive()
    }

    pub(crate) fn write_module(&self, id: ModuleId) -> RwLockWriteGuard<'_, Box<dyn Module>> {
        self.nodes[id.0].module.write()
    }

    pub(crate) fn sibling_variants(&self, id: ModuleId) -> Vec<ModuleId> {
        self.groups[self.nodes[id.0].group].variants.clone()
    }

    pub(crate) fn queue_rename(&self, id: ModuleId, name: &str) {
        self.pending_renames
            .lock()
            .push((self.nodes[id.0].group, name.to_owned()));
    }

    pub(crate) fn apply_renames(&mut self) {
        let renames = std::mem::take(self.pending_renames.get_mut());
        for (group, name) in renames {
            let old = std::mem::replace(&mut self.groups[group].name, name.clone());
            tracing::debug!("Renaming module {} to {}", old, name);
            self.names.remove(&old);
            self.names.insert(name.clone(), group);
            for variant in self.groups[group].variants.clone() {
                self.nodes[variant.0]
                    .module
                    .get_mut()
                    .base_mut()
                    .set_name(name.clone());
            }
        }
    }

    /// Finds the variant of `name` a new dependency of `from` points at.
    ///
    /// Every transition that already ran is replayed on the edge: the
    /// outgoing transition of `from` (or the explicitly requested
    /// variation) followed by the incoming transition of the dependency.
    pub(crate) fn resolve_dependency(
        &self,
        from: ModuleId,
        from_module: &dyn Module,
        tag: &dyn DependencyTag,
        name: &str,
        explicit: &[Variation],
        mutator: &str,
    ) -> Result<Option<ModuleId>, String> {
        let group = match self.names.get(name) {
            Some(group) => *group,
            None if self.config.allow_missing_dependencies() => return Ok(None),
            None => return Err(format!("depends on undefined module {:?}", name)),
        };
        let candidates = &self.groups[group].variants;
        let mut requested: Vec<Variation> = Vec::new();

        for entry in &self.completed_transitions {
            let outgoing = match explicit.iter().find(|v| v.mutator == entry.name) {
                Some(v) => entry.mutator.info_from_variation(&v.variation),
                None => {
                    let source = self.nodes[from.0]
                        .transition_infos
                        .get(entry.name.as_str())
                        .ok_or_else(|| {
                            format!(
                                "{} was not visited by the {} mutator",
                                self.module_string(from),
                                entry.name
                            )
                        })?;
                    let base = BaseModuleContext::new(self, from, from_module, mutator);
                    entry
                        .mutator
                        .outgoing(&OutgoingTransitionContext::new(base, tag), source)
                }
            };
            let target = self
                .first_matching_variant(candidates, &requested)
                .ok_or_else(|| self.missing_variant_message(name, from, &requested, candidates))?;
            let incoming = if target == from {
                let base = BaseModuleContext::new(self, target, from_module, mutator);
                entry.mutator.incoming(
                    &IncomingTransitionContext::new(base, Some(tag), true),
                    &outgoing,
                )
            } else {
                let guard = self.read_module(target);
                let base = BaseModuleContext::new(self, target, &**guard, mutator);
                entry.mutator.incoming(
                    &IncomingTransitionContext::new(base, Some(tag), true),
                    &outgoing,
                )
            };
            requested.push(Variation::new(&entry.name, &incoming.variation));
        }
        for v in explicit {
            if !requested.iter().any(|r| r.mutator == v.mutator) {
                requested.push(v.clone());
            }
        }

        let target = self
            .first_matching_variant(candidates, &requested)
            .ok_or_else(|| self.missing_variant_message(name, from, &requested, candidates))?;
        if target == from {
            return Err(format!("module {:?} depends on itself", name));
        }
        Ok(Some(target))
    }

    fn first_matching_variant(
        &self,
        candidates: &[ModuleId],
        requested: &[Variation],
    ) -> Option<ModuleId> {
        candidates.iter().copied().find(|id| {
            requested
                .iter()
                .all(|r| self.variation(*id, &r.mutator) == r.variation)
        })
    }

    fn missing_variant_message(
        &self,
        name: &str,
        from: ModuleId,
        requested: &[Variation],
        candidates: &[ModuleId],
    ) -> String {
        format!(
            "dependency {:?} of {:?} missing variant:\n  {}\navailable variants:\n  {}",
            name,
            self.module_name(from),
            format_variations(requested),
            candidates
                .iter()
                .map(|id| format_variations(&self.nodes[id.0].variations))
                .join("\n  ")
        )
    }

    /// Variants bucketed by level, leaves first.
    pub(crate) fn levels(&self) -> Result<Vec<Vec<ModuleId>>, GraphError> {
        let mut levels: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];
        let mut stack = Vec::new();
        let all = self.all_variants();
        for id in &all {
            self.compute_level(*id, &mut levels, &mut on_stack, &mut stack)?;
        }
        let mut buckets: Vec<Vec<ModuleId>> = Vec::new();
        for id in all {
            if let Some(level) = levels[id.0] {
                if buckets.len() <= level {
                    buckets.resize_with(level + 1, Vec::new);
                }
                buckets[level].push(id);
            }
        }
        Ok(buckets)
    }

    fn compute_level(
        &self,
        id: ModuleId,
        levels: &mut [Option<usize>],
        on_stack: &mut [bool],
        stack: &mut Vec<ModuleId>,
    ) -> Result<usize, GraphError> {
        if let Some(level) = levels[id.0] {
            return Ok(level);
        }
        if on_stack[id.0] {
            let start = stack.iter().position(|s| *s == id).unwrap_or(0);
            let cycle = stack[start..]
                .iter()
                .chain(std::iter::once(&id))
                .map(|s| self.module_string(*s))
                .join(" -> ");
            return Err(GraphError::Cycle(cycle));
        }
        on_stack[id.0] = true;
        stack.push(id);
        let mut level = 0;
        for edge in self.dep_edges(id) {
            level = level.max(1 + self.compute_level(edge.target, levels, on_stack, stack)?);
        }
        stack.pop();
        on_stack[id.0] = false;
        levels[id.0] = Some(level);
        Ok(level)
    }

    /// Runs a bottom-up (or, reversed, top-down) visit.
    pub(crate) fn run_visit(
        &self,
        name: &str,
        f: &MutatorFn,
        parallel: bool,
        top_down: bool,
    ) -> Result<(), GraphError> {
        let mut levels = self.levels()?;
        if top_down {
            levels.reverse();
        }
        for level in &levels {
            if parallel {
                level
                    .par_iter()
                    .for_each(|id| self.visit(*id, name, f, true));
            } else {
                for id in level {
                    self.visit(*id, name, f, false);
                }
            }
        }
        Ok(())
    }

    fn visit(&self, id: ModuleId, name: &str, f: &MutatorFn, parallel: bool) {
        let mut guard = self.write_module(id);
        let mut ctx = BottomUpMutatorContext::new(self, id, &mut **guard, name, parallel);
        f(&mut ctx);
    }

    /// Runs a transition mutator over the whole graph.
    ///
    /// Modules are split top-down so that every variation requested by a
    /// depending module is known before the dependency is split. Edges are
    /// then rewired to the variants chosen by the incoming transitions, and
    /// finally every variant is mutated bottom-up.
    pub(crate) fn run_transition(&mut self, entry: &Arc<TransitionEntry>) -> Result<(), GraphError> {
        let name = entry.name.as_str();
        let levels = self.levels()?;
        let top_down: Vec<ModuleId> = levels.iter().rev().flatten().copied().collect();

        let mut requested: HashMap<ModuleId, BTreeMap<String, AnyTransitionInfo>> = HashMap::new();
        let mut splits: HashMap<ModuleId, IndexMap<String, AnyTransitionInfo>> = HashMap::new();
        let mut edge_variations: HashMap<(ModuleId, String), Vec<String>> = HashMap::new();
        let mut original_deps: HashMap<ModuleId, Vec<DepEdge>> = HashMap::new();

        for &id in &top_down {
            let guard = self.read_module(id);
            let base = BaseModuleContext::new(self, id, &**guard, name);
            let mut infos: IndexMap<String, AnyTransitionInfo> = IndexMap::new();
            for info in entry.mutator.split(&base) {
                infos.entry(info.variation.clone()).or_insert(info);
            }
            // Variations only dependents asked for come after the split ones.
            for (variation, info) in requested.remove(&id).unwrap_or_default() {
                infos.entry(variation).or_insert(info);
            }
            if infos.is_empty() {
                panic!(
                    "{} mutator created no variations for {}",
                    name,
                    self.module_string(id)
                );
            }

            let deps = self.dep_edges(id);
            for (variation, info) in &infos {
                let mut resolved = Vec::with_capacity(deps.len());
                for edge in &deps {
                    let outgoing = entry
                        .mutator
                        .outgoing(&OutgoingTransitionContext::new(base, &*edge.tag), info);
                    let target_guard = self.read_module(edge.target);
                    let target_base =
                        BaseModuleContext::new(self, edge.target, &**target_guard, name);
                    let incoming = entry.mutator.incoming(
                        &IncomingTransitionContext::new(target_base, Some(&*edge.tag), false),
                        &outgoing,
                    );
                    resolved.push(incoming.variation.clone());
                    requested
                        .entry(edge.target)
                        .or_default()
                        .entry(incoming.variation.clone())
                        .or_insert(incoming);
                }
                edge_variations.insert((id, variation.clone()), resolved);
            }
            original_deps.insert(id, deps);
            splits.insert(id, infos);
        }

        let mut created: HashMap<ModuleId, Vec<(ModuleId, String)>> = HashMap::new();
        let mut new_variant_count = 0;
        for &id in &top_down {
            let Some(infos) = splits.remove(&id) else {
                continue;
            };
            let mut variants = Vec::with_capacity(infos.len());
            for (i, (variation, info)) in infos.into_iter().enumerate() {
                let variant = if i == 0 {
                    id
                } else {
                    new_variant_count += 1;
                    self.clone_node(id)
                };
                variants.push((variant, variation, info));
            }
            for (variant, variation, info) in &variants {
                let node = &mut self.nodes[variant.0];
                node.variations.push(Variation::new(name, variation));
                node.transition_infos.insert(name.to_owned(), info.clone());
            }
            created.insert(
                id,
                variants
                    .into_iter()
                    .map(|(variant, variation, _)| (variant, variation))
                    .collect(),
            );
        }

        for (id, variants) in &created {
            let deps = &original_deps[id];
            for (variant, variation) in variants {
                let resolved = &edge_variations[&(*id, variation.clone())];
                let mut new_deps = Vec::with_capacity(deps.len());
                for (edge, target_variation) in deps.iter().zip(resolved) {
                    let target = created
                        .get(&edge.target)
                        .and_then(|vs| vs.iter().find(|(_, v)| v == target_variation))
                        .map(|(t, _)| *t);
                    match target {
                        Some(target) => new_deps.push(DepEdge {
                            tag: edge.tag.dupe(),
                            target,
                        }),
                        None => panic!(
                            "{} mutator did not create variation {:?} of {}",
                            name,
                            target_variation,
                            self.module_name(edge.target)
                        ),
                    }
                }
                *self.nodes[variant.0].deps.get_mut() = new_deps;
            }
        }

        for group in &mut self.groups {
            group.variants = group
                .variants
                .iter()
                .flat_map(|old| match created.get(old) {
                    Some(variants) => variants.iter().map(|(v, _)| *v).collect(),
                    None => vec![*old],
                })
                .collect();
        }
        tracing::debug!(
            "Transition mutator {} created {} new variants",
            name,
            new_variant_count
        );

        self.completed_transitions.push(entry.dupe());

        for level in &self.levels()? {
            level
                .par_iter()
                .for_each(|id| self.mutate_variant(*id, entry));
        }
        Ok(())
    }

    fn clone_node(&mut self, id: ModuleId) -> ModuleId {
        let new_id = ModuleId(self.nodes.len());
        let node = &self.nodes[id.0];
        let module = node.module.read().clone_module();
        let clone = ModuleNode {
            group: node.group,
            variations: node.variations.clone(),
            module: RwLock::new(module),
            deps: Mutex::new(Vec::new()),
            providers: node.providers.clone(),
            transition_infos: node.transition_infos.clone(),
        };
        self.nodes.push(clone);
        new_id
    }

    fn mutate_variant(&self, id: ModuleId, entry: &TransitionEntry) {
        let node = &self.nodes[id.0];
        let Some(info) = node.transition_infos.get(entry.name.as_str()) else {
            return;
        };
        let mut guard = node.module.write();
        if !info.variation.is_empty() {
            guard.base_mut().record_variation(&entry.name, &info.variation);
        }
        let mut ctx = BottomUpMutatorContext::new(self, id, &mut **guard, &entry.name, true);
        entry.mutator.mutate(&mut ctx, info);
    }
}

fn format_variations(variations: &[Variation]) -> String {
    variations
        .iter()
        .filter(|v| !v.variation.is_empty())
        .map(|v| format!("{}:{}", v.mutator, v.variation))
        .join(",")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use soong_core::errors::BuildErrors;

    use super::*;
    use crate::module::NamedDependencyTag;
    use crate::mutator::MutatorRegistry;
    use crate::testing::modules;
    use crate::testing::test_config;
    use crate::testing::variant;
    use crate::testing::variant_strings;
    use crate::testing::TestModule;
    use crate::transition::VariationTransitionMutator;

    /// Splits modules named `multi*` into `a` and `b`. Modules named
    /// `follow*` take whatever variation their dependents ask for.
    struct FlavorMutator;

    impl VariationTransitionMutator for FlavorMutator {
        fn split(&self, ctx: &BaseModuleContext<'_>) -> Vec<String> {
            if ctx.module_name().starts_with("multi") {
                vec!["a".to_owned(), "b".to_owned()]
            } else {
                vec![String::new()]
            }
        }

        fn outgoing_transition(&self, _ctx: &OutgoingTransitionContext<'_>, source: &str) -> String {
            source.to_owned()
        }

        fn incoming_transition(&self, ctx: &IncomingTransitionContext<'_>, incoming: &str) -> String {
            let name = ctx.module_name();
            if name.starts_with("multi") || name.starts_with("follow") {
                incoming.to_owned()
            } else {
                String::new()
            }
        }

        fn mutate(&self, _ctx: &mut BottomUpMutatorContext<'_>, _variation: &str) {}
    }

    fn run(registry: &MutatorRegistry, modules: Vec<Box<dyn Module>>) -> ModuleGraph {
        let mut graph = ModuleGraph::new(test_config());
        for module in modules {
            graph.add_module(module).unwrap();
        }
        graph.run_mutators(registry).unwrap();
        graph
    }

    fn dep_strings(graph: &ModuleGraph, id: ModuleId) -> Vec<String> {
        graph
            .direct_deps(id)
            .into_iter()
            .map(|(dep, _)| graph.module_string(dep))
            .collect()
    }

    #[test]
    fn test_duplicate_module() {
        let mut graph = ModuleGraph::new(test_config());
        graph.add_module(Box::new(TestModule::new("libfoo"))).unwrap();
        let err = graph
            .add_module(Box::new(TestModule::new("libfoo")))
            .unwrap_err();
        assert_matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::DuplicateModule(name)) if name == "libfoo"
        );
    }

    #[test]
    fn test_undefined_dependency() {
        let mut graph = ModuleGraph::new(test_config());
        graph
            .add_module(Box::new(TestModule::new("libfoo").dep("libmissing")))
            .unwrap();
        let err = graph.run_mutators(&MutatorRegistry::new()).unwrap_err();
        let errors = err.downcast_ref::<BuildErrors>().unwrap();
        assert!(errors.contains("depends on undefined module \"libmissing\""));
    }

    #[test]
    fn test_cycle() {
        let mut graph = ModuleGraph::new(test_config());
        for module in modules![
            TestModule::new("liba").dep("libb"),
            TestModule::new("libb").dep("liba"),
        ] {
            graph.add_module(module).unwrap();
        }
        let mut registry = MutatorRegistry::new();
        registry.post_deps(|ctx| {
            ctx.bottom_up("after_deps", |_ctx| {});
        });
        let err = graph.run_mutators(&registry).unwrap_err();
        assert_matches!(err.downcast_ref::<GraphError>(), Some(GraphError::Cycle(_)));
    }

    #[test]
    fn test_dependencies_replay_earlier_transitions() {
        let mut registry = MutatorRegistry::new();
        registry.pre_deps(|ctx| {
            ctx.transition("flavor", FlavorMutator);
        });
        registry.post_deps(|ctx| {
            ctx.bottom_up("cross", |ctx| {
                if ctx.module_name() == "multi_bin" && ctx.base().variations()[0].variation == "a" {
                    ctx.add_variation_dependency(
                        &[Variation::new("flavor", "b")],
                        Arc::new(NamedDependencyTag("cross")),
                        "multi_lib",
                    );
                }
            });
        });
        let graph = run(
            &registry,
            modules![
                TestModule::new("multi_bin").dep("multi_lib").dep("plain"),
                TestModule::new("multi_lib"),
                TestModule::new("plain"),
            ],
        );

        assert_eq!(
            vec!["multi_bin{flavor:a}".to_owned(), "multi_bin{flavor:b}".to_owned()],
            variant_strings(&graph, "multi_bin")
        );
        let bin_a = variant(&graph, "multi_bin", &[("flavor", "a")]);
        let bin_b = variant(&graph, "multi_bin", &[("flavor", "b")]);
        assert_eq!(
            vec![
                "multi_lib{flavor:a}".to_owned(),
                "plain".to_owned(),
                "multi_lib{flavor:b}".to_owned(),
            ],
            dep_strings(&graph, bin_a)
        );
        assert_eq!(
            vec!["multi_lib{flavor:b}".to_owned(), "plain".to_owned()],
            dep_strings(&graph, bin_b)
        );
        graph.with_module(bin_b, |m| {
            assert_eq!(&["flavor".to_owned()], m.base().debug_mutators());
            assert_eq!(&["b".to_owned()], m.base().debug_variations());
        });
    }

    #[test]
    fn test_transition_splits_existing_edges() {
        let mut registry = MutatorRegistry::new();
        registry.post_deps(|ctx| {
            ctx.transition("flavor", FlavorMutator);
        });
        let graph = run(
            &registry,
            modules![
                TestModule::new("multi_bin").dep("follow_lib").dep("plain"),
                TestModule::new("follow_lib").dep("plain"),
                TestModule::new("plain"),
            ],
        );

        // The variation follow_lib splits into on its own comes first.
        assert_eq!(
            vec![
                "follow_lib".to_owned(),
                "follow_lib{flavor:a}".to_owned(),
                "follow_lib{flavor:b}".to_owned(),
            ],
            variant_strings(&graph, "follow_lib")
        );
        assert_eq!(vec!["plain".to_owned()], variant_strings(&graph, "plain"));
        let bin_a = variant(&graph, "multi_bin", &[("flavor", "a")]);
        assert_eq!(
            vec!["follow_lib{flavor:a}".to_owned(), "plain".to_owned()],
            dep_strings(&graph, bin_a)
        );
        // A mutator that doesn't split a module matches the empty variation.
        assert_eq!(
            Some(variant(&graph, "plain", &[])),
            graph.variant("plain", &[("flavor", ""), ("other", "")])
        );
    }

    #[test]
    #[should_panic(expected = "TransitionMutator not allowed in FinalDepsMutators")]
    fn test_transition_in_final_phase() {
        let mut registry = MutatorRegistry::new();
        registry.final_deps(|ctx| {
            ctx.transition("flavor", FlavorMutator);
        });
        run(&registry, modules![TestModule::new("plain")]);
    }

    #[test]
    fn test_visit_order() {
        let visited = Arc::new(Mutex::new(Vec::new()));
        let mut registry = MutatorRegistry::new();
        let bottom_up = visited.dupe();
        let top_down = visited.dupe();
        registry.post_deps(move |ctx| {
            let bottom_up = bottom_up.dupe();
            ctx.bottom_up("bottom_up", move |ctx| {
                bottom_up.lock().push(format!("up:{}", ctx.module_name()));
            });
            let top_down = top_down.dupe();
            ctx.top_down("top_down", move |ctx| {
                top_down.lock().push(format!("down:{}", ctx.module_name()));
            });
        });
        run(
            &registry,
            modules![
                TestModule::new("liba").dep("libb"),
                TestModule::new("libb").dep("libc"),
                TestModule::new("libc"),
            ],
        );
        assert_eq!(
            vec![
                "up:libc", "up:libb", "up:liba", "down:liba", "down:libb", "down:libc",
            ],
            *visited.lock()
        );
    }

    #[test]
    fn test_rename() {
        let mut registry = MutatorRegistry::new();
        registry.post_deps(|ctx| {
            ctx.bottom_up("rename", |ctx| {
                if ctx.module_name() == "libold" {
                    ctx.rename("libnew");
                }
            });
        });
        let graph = run(&registry, modules![TestModule::new("libold")]);
        assert!(graph.module_exists("libnew"));
        assert!(!graph.module_exists("libold"));
        let id = variant(&graph, "libnew", &[]);
        assert_eq!("libnew", graph.with_module(id, |m| m.name().to_owned()));
    }
}
