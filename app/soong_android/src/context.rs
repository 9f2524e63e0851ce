/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Contexts handed to mutators while they visit a module.
//!
//! A context borrows the graph and the visited module for the duration of a
//! single callback, so nothing obtained from it can outlive the call.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use soong_bazel::context::BazelContext;
use soong_core::config::BuildConfig;

use crate::graph::ModuleGraph;
use crate::module::ArchType;
use crate::module::DependencyTag;
use crate::module::Module;
use crate::module::ModuleId;
use crate::module::Os;
use crate::module::Variation;
use crate::provider::ProviderKey;

/// Read-only view of the visited module.
#[derive(Clone, Copy)]
pub struct BaseModuleContext<'a> {
    pub(crate) graph: &'a ModuleGraph,
    pub(crate) id: ModuleId,
    pub(crate) module: &'a dyn Module,
    pub(crate) mutator: &'a str,
}

impl<'a> BaseModuleContext<'a> {
    pub(crate) fn new(
        graph: &'a ModuleGraph,
        id: ModuleId,
        module: &'a dyn Module,
        mutator: &'a str,
    ) -> BaseModuleContext<'a> {
        BaseModuleContext {
            graph,
            id,
            module,
            mutator,
        }
    }

    pub fn module(&self) -> &'a dyn Module {
        self.module
    }

    pub fn module_id(&self) -> ModuleId {
        self.id
    }

    pub fn module_name(&self) -> &'a str {
        self.module.name()
    }

    /// The module and its variations, e.g. `libfoo{image:vendor}`.
    pub fn module_string(&self) -> String {
        self.graph.module_string(self.id)
    }

    pub fn variations(&self) -> &'a [Variation] {
        self.graph.variations(self.id)
    }

    pub fn os(&self) -> Os {
        self.module.base().os
    }

    pub fn arch(&self) -> ArchType {
        self.module.base().arch
    }

    pub fn host(&self) -> bool {
        self.module.base().host()
    }

    pub fn device(&self) -> bool {
        !self.host()
    }

    pub fn config(&self) -> &'a BuildConfig {
        self.graph.config()
    }

    pub fn mutator_name(&self) -> &'a str {
        self.mutator
    }

    pub fn bazel_context(&self) -> Option<&'a Arc<dyn BazelContext>> {
        self.graph.bazel_context()
    }

    pub fn provider<T: Clone + Send + Sync + 'static>(&self, key: &ProviderKey<T>) -> Option<T> {
        self.graph.provider(self.id, key)
    }

    pub fn other_module_provider<T: Clone + Send + Sync + 'static>(
        &self,
        other: ModuleId,
        key: &ProviderKey<T>,
    ) -> Option<T> {
        self.graph.provider(other, key)
    }

    pub fn other_module_name(&self, other: ModuleId) -> &'a str {
        self.graph.module_name(other)
    }

    pub fn other_module_exists(&self, name: &str) -> bool {
        self.graph.module_exists(name)
    }

    pub fn module_error(&self, message: impl Into<String>) {
        self.graph
            .errors()
            .module_error(self.module_name(), message);
    }

    pub fn property_error(&self, property: &str, message: impl Into<String>) {
        self.graph
            .errors()
            .property_error(self.module_name(), property, message);
    }

    pub fn other_module_error(&self, other: ModuleId, message: impl Into<String>) {
        self.graph
            .errors()
            .module_error(self.graph.module_name(other), message);
    }

    /// Direct dependencies of the module, in the order they were added.
    pub fn visit_direct_deps(&self, mut f: impl FnMut(DepRef<'_>)) {
        for edge in self.graph.dep_edges(self.id) {
            let guard = self.graph.read_module(edge.target);
            f(DepRef {
                id: edge.target,
                tag: &*edge.tag,
                module: &**guard,
            });
        }
    }

    /// Depth-first walk of the transitive dependencies.
    ///
    /// `f` is called once per edge and returns whether to walk the
    /// dependencies of the child. A module's dependencies are walked at most
    /// once even when it is reached along several edges.
    pub fn walk_deps(&self, mut f: impl FnMut(&WalkStep<'_>) -> bool) {
        let mut walked = HashSet::new();
        let mut path = vec![self.id];
        walk_from(
            self.graph,
            self.id,
            self.module,
            &mut walked,
            &mut path,
            &mut f,
        );
    }

    /// Names along a walk path joined by ` -> `.
    pub fn path_string(&self, path: &[ModuleId], skip_first: bool) -> String {
        let skip = if skip_first { 1 } else { 0 };
        path.iter()
            .skip(skip)
            .map(|id| self.graph.module_name(*id))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

fn walk_from(
    graph: &ModuleGraph,
    parent: ModuleId,
    parent_module: &dyn Module,
    walked: &mut HashSet<ModuleId>,
    path: &mut Vec<ModuleId>,
    f: &mut dyn FnMut(&WalkStep<'_>) -> bool,
) {
    for edge in graph.dep_edges(parent) {
        let guard = graph.read_module(edge.target);
        path.push(edge.target);
        let descend = f(&WalkStep {
            child: DepRef {
                id: edge.target,
                tag: &*edge.tag,
                module: &**guard,
            },
            parent_id: parent,
            parent: parent_module,
            path: path.as_slice(),
        });
        if descend && walked.insert(edge.target) {
            walk_from(graph, edge.target, &**guard, walked, path, f);
        }
        path.pop();
    }
}

/// A dependency as seen from the depending module.
#[derive(Clone, Copy)]
pub struct DepRef<'a> {
    pub id: ModuleId,
    pub tag: &'a dyn DependencyTag,
    pub module: &'a dyn Module,
}

/// One edge of a [`BaseModuleContext::walk_deps`] walk.
pub struct WalkStep<'a> {
    pub child: DepRef<'a>,
    pub parent_id: ModuleId,
    pub parent: &'a dyn Module,
    /// Modules from the walk root to `child`, both included.
    pub path: &'a [ModuleId],
}

/// Context of an outgoing transition: the depending module and the edge tag.
pub struct OutgoingTransitionContext<'a> {
    base: BaseModuleContext<'a>,
    tag: &'a dyn DependencyTag,
}

impl<'a> OutgoingTransitionContext<'a> {
    pub(crate) fn new(
        base: BaseModuleContext<'a>,
        tag: &'a dyn DependencyTag,
    ) -> OutgoingTransitionContext<'a> {
        OutgoingTransitionContext { base, tag }
    }

    pub fn dep_tag(&self) -> &'a dyn DependencyTag {
        self.tag
    }
}

impl<'a> Deref for OutgoingTransitionContext<'a> {
    type Target = BaseModuleContext<'a>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// Context of an incoming transition: the dependency being resolved.
pub struct IncomingTransitionContext<'a> {
    base: BaseModuleContext<'a>,
    tag: Option<&'a dyn DependencyTag>,
    adding_dependency: bool,
}

impl<'a> IncomingTransitionContext<'a> {
    pub(crate) fn new(
        base: BaseModuleContext<'a>,
        tag: Option<&'a dyn DependencyTag>,
        adding_dependency: bool,
    ) -> IncomingTransitionContext<'a> {
        IncomingTransitionContext {
            base,
            tag,
            adding_dependency,
        }
    }

    pub fn dep_tag(&self) -> Option<&'a dyn DependencyTag> {
        self.tag
    }

    /// True when the transition is replayed for a dependency added after the
    /// mutator ran, false while the mutator itself is running.
    pub fn is_adding_dependency(&self) -> bool {
        self.adding_dependency
    }
}

impl<'a> Deref for IncomingTransitionContext<'a> {
    type Target = BaseModuleContext<'a>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// Context of a bottom-up or top-down visit. Owns write access to the
/// visited variant.
pub struct BottomUpMutatorContext<'a> {
    graph: &'a ModuleGraph,
    id: ModuleId,
    module: &'a mut dyn Module,
    mutator: &'a str,
    parallel: bool,
}

pub type TopDownMutatorContext<'a> = BottomUpMutatorContext<'a>;

impl<'a> BottomUpMutatorContext<'a> {
    pub(crate) fn new(
        graph: &'a ModuleGraph,
        id: ModuleId,
        module: &'a mut dyn Module,
        mutator: &'a str,
        parallel: bool,
    ) -> BottomUpMutatorContext<'a> {
        BottomUpMutatorContext {
            graph,
            id,
            module,
            mutator,
            parallel,
        }
    }

    pub fn base(&self) -> BaseModuleContext<'_> {
        BaseModuleContext::new(self.graph, self.id, &*self.module, self.mutator)
    }

    pub fn module(&self) -> &dyn Module {
        &*self.module
    }

    pub fn module_mut(&mut self) -> &mut dyn Module {
        &mut *self.module
    }

    pub fn module_id(&self) -> ModuleId {
        self.id
    }

    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    pub fn config(&self) -> &'a BuildConfig {
        self.graph.config()
    }

    pub fn provider<T: Clone + Send + Sync + 'static>(&self, key: &ProviderKey<T>) -> Option<T> {
        self.graph.provider(self.id, key)
    }

    pub fn set_provider<T: Send + Sync + 'static>(&self, key: &ProviderKey<T>, value: T) {
        self.graph.set_provider(self.id, key, value, self.mutator);
    }

    pub fn module_error(&self, message: impl Into<String>) {
        self.base().module_error(message);
    }

    pub fn property_error(&self, property: &str, message: impl Into<String>) {
        self.base().property_error(property, message);
    }

    /// Adds a dependency on `name`, resolving the variant by replaying the
    /// transitions that already ran. Returns the resolved variant.
    pub fn add_dependency(&mut self, tag: Arc<dyn DependencyTag>, name: &str) -> Option<ModuleId> {
        self.add_variation_dependency(&[], tag, name)
    }

    /// Like [`Self::add_dependency`], but takes the listed variations as
    /// given instead of computing them.
    pub fn add_variation_dependency(
        &mut self,
        variations: &[Variation],
        tag: Arc<dyn DependencyTag>,
        name: &str,
    ) -> Option<ModuleId> {
        let resolved = self.graph.resolve_dependency(
            self.id,
            &*self.module,
            &*tag,
            name,
            variations,
            self.mutator,
        );
        match resolved {
            Ok(Some(target)) => {
                self.graph.push_dep_edge(self.id, tag, target);
                Some(target)
            }
            Ok(None) => None,
            Err(message) => {
                self.module_error(message);
                None
            }
        }
    }

    /// Renames every variant of this module once the current pass is over.
    pub fn rename(&self, name: &str) {
        self.graph.queue_rename(self.id, name);
    }

    /// Calls `f` on every variant of this module, including itself. Only
    /// sequential mutators may look at sibling variants.
    pub fn visit_all_module_variants(&self, mut f: impl FnMut(ModuleId, &dyn Module)) {
        assert!(
            !self.parallel,
            "visit_all_module_variants called from parallel mutator {}",
            self.mutator
        );
        for variant in self.graph.sibling_variants(self.id) {
            if variant == self.id {
                f(variant, &*self.module);
            } else {
                let guard = self.graph.read_module(variant);
                f(variant, &**guard);
            }
        }
    }

    /// Mutable access to another module from a sequential mutator.
    pub fn with_other_module_mut<R>(
        &self,
        other: ModuleId,
        f: impl FnOnce(&mut dyn Module) -> R,
    ) -> R {
        assert!(
            !self.parallel && other != self.id,
            "with_other_module_mut called on {} from mutator {}",
            other,
            self.mutator
        );
        let mut guard = self.graph.write_module(other);
        f(&mut **guard)
    }
}
