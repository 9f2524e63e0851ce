/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Mutator registration and the pass runner.
//!
//! Mutators are registered into phases. Phases run in a fixed order, and
//! within a phase mutators run in registration order. Each mutator is one
//! pass over every module variant.

use std::sync::Arc;
use std::time::Instant;

use crate::apex;
use crate::context::BottomUpMutatorContext;
use crate::graph::ModuleGraph;
use crate::graph::MutatorFn;
use crate::image;
use crate::mixed_builds;
use crate::packaging;
use crate::transition::TransitionEntry;
use crate::transition::TransitionInfoMutator;
use crate::transition::VariationTransitionAdapter;
use crate::transition::VariationTransitionMutator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, derive_more::Display)]
pub enum MutatorPhase {
    #[display("pre_arch")]
    PreArch,
    #[display("pre_deps")]
    PreDeps,
    #[display("deps")]
    Deps,
    #[display("post_deps")]
    PostDeps,
    #[display("post_apex")]
    PostApex,
    #[display("final_deps")]
    FinalDeps,
}

enum MutatorKind {
    BottomUp { f: Arc<MutatorFn>, parallel: bool },
    TopDown { f: Arc<MutatorFn>, parallel: bool },
    Transition(Arc<TransitionEntry>),
}

pub struct Mutator {
    name: String,
    phase: MutatorPhase,
    kind: MutatorKind,
}

impl Mutator {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> MutatorPhase {
        self.phase
    }
}

/// Returned by registration to adjust a mutator.
pub struct MutatorHandle<'a> {
    mutator: &'a mut Mutator,
}

impl MutatorHandle<'_> {
    /// Lets the variants of one level be visited concurrently.
    pub fn parallel(self) -> Self {
        match &mut self.mutator.kind {
            MutatorKind::BottomUp { parallel, .. } | MutatorKind::TopDown { parallel, .. } => {
                *parallel = true
            }
            MutatorKind::Transition(_) => {}
        }
        self
    }
}

/// Collects the mutators of one phase.
pub struct RegisterMutatorsContext {
    mutators: Vec<Mutator>,
    phase: MutatorPhase,
}

impl RegisterMutatorsContext {
    fn push(&mut self, name: &str, kind: MutatorKind) -> MutatorHandle<'_> {
        let index = self.mutators.len();
        self.mutators.push(Mutator {
            name: name.to_owned(),
            phase: self.phase,
            kind,
        });
        MutatorHandle {
            mutator: &mut self.mutators[index],
        }
    }

    pub fn bottom_up(
        &mut self,
        name: &str,
        f: impl Fn(&mut BottomUpMutatorContext<'_>) + Send + Sync + 'static,
    ) -> MutatorHandle<'_> {
        self.push(
            name,
            MutatorKind::BottomUp {
                f: Arc::new(f),
                parallel: false,
            },
        )
    }

    pub fn top_down(
        &mut self,
        name: &str,
        f: impl Fn(&mut BottomUpMutatorContext<'_>) + Send + Sync + 'static,
    ) -> MutatorHandle<'_> {
        self.push(
            name,
            MutatorKind::TopDown {
                f: Arc::new(f),
                parallel: false,
            },
        )
    }

    pub fn transition(
        &mut self,
        name: &str,
        mutator: impl VariationTransitionMutator,
    ) -> MutatorHandle<'_> {
        self.info_based_transition(name, VariationTransitionAdapter(mutator))
    }

    pub fn info_based_transition(
        &mut self,
        name: &str,
        mutator: impl TransitionInfoMutator,
    ) -> MutatorHandle<'_> {
        let entry = Arc::new(TransitionEntry::new(name, mutator));
        self.push(name, MutatorKind::Transition(entry))
    }
}

pub type RegisterMutatorFunc = Box<dyn Fn(&mut RegisterMutatorsContext) + Send + Sync>;

/// The registration functions of every phase.
#[derive(Default)]
pub struct MutatorRegistry {
    pre_arch: Vec<RegisterMutatorFunc>,
    pre_deps: Vec<RegisterMutatorFunc>,
    post_deps: Vec<RegisterMutatorFunc>,
    post_apex: Vec<RegisterMutatorFunc>,
    final_deps: Vec<RegisterMutatorFunc>,
}

impl MutatorRegistry {
    pub fn new() -> MutatorRegistry {
        MutatorRegistry::default()
    }

    /// The image, APEX, packaging and mixed build mutators.
    pub fn with_standard_mutators() -> MutatorRegistry {
        let mut registry = MutatorRegistry::new();
        registry.pre_deps(image::register_image_mutator);
        registry.post_deps(apex::register_apex_mutators);
        registry.final_deps(apex::register_apex_check_mutators);
        registry.final_deps(packaging::register_packaging_mutators);
        registry.final_deps(mixed_builds::register_mixed_builds_mutator);
        registry
    }

    pub fn pre_arch(
        &mut self,
        f: impl Fn(&mut RegisterMutatorsContext) + Send + Sync + 'static,
    ) -> &mut Self {
        self.pre_arch.push(Box::new(f));
        self
    }

    pub fn pre_deps(
        &mut self,
        f: impl Fn(&mut RegisterMutatorsContext) + Send + Sync + 'static,
    ) -> &mut Self {
        self.pre_deps.push(Box::new(f));
        self
    }

    pub fn post_deps(
        &mut self,
        f: impl Fn(&mut RegisterMutatorsContext) + Send + Sync + 'static,
    ) -> &mut Self {
        self.post_deps.push(Box::new(f));
        self
    }

    pub fn post_apex(
        &mut self,
        f: impl Fn(&mut RegisterMutatorsContext) + Send + Sync + 'static,
    ) -> &mut Self {
        self.post_apex.push(Box::new(f));
        self
    }

    pub fn final_deps(
        &mut self,
        f: impl Fn(&mut RegisterMutatorsContext) + Send + Sync + 'static,
    ) -> &mut Self {
        self.final_deps.push(Box::new(f));
        self
    }

    /// All mutators in the order they run. The deps mutator sits between the
    /// pre-deps and post-deps phases.
    pub fn collate(&self) -> Vec<Mutator> {
        let mut ctx = RegisterMutatorsContext {
            mutators: Vec::new(),
            phase: MutatorPhase::PreArch,
        };
        let phases: [(MutatorPhase, &[RegisterMutatorFunc]); 5] = [
            (MutatorPhase::PreArch, self.pre_arch.as_slice()),
            (MutatorPhase::PreDeps, self.pre_deps.as_slice()),
            (MutatorPhase::PostDeps, self.post_deps.as_slice()),
            (MutatorPhase::PostApex, self.post_apex.as_slice()),
            (MutatorPhase::FinalDeps, self.final_deps.as_slice()),
        ];
        for (phase, funcs) in phases {
            if phase == MutatorPhase::PostDeps {
                ctx.phase = MutatorPhase::Deps;
                register_deps_mutator(&mut ctx);
            }
            ctx.phase = phase;
            for f in funcs {
                f(&mut ctx);
            }
        }
        ctx.mutators
    }
}

fn register_deps_mutator(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("deps", deps_mutator);
}

fn deps_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    for (tag, name) in ctx.module().declared_deps() {
        ctx.add_dependency(tag, &name);
    }
    packaging::add_packaging_deps(ctx);
}

impl ModuleGraph {
    /// Runs every registered mutator.
    ///
    /// Errors reported by modules during a pass fail the run once the pass
    /// is over; the returned error downcasts to
    /// [`soong_core::errors::BuildErrors`].
    pub fn run_mutators(&mut self, registry: &MutatorRegistry) -> anyhow::Result<()> {
        for mutator in registry.collate() {
            let start = Instant::now();
            match &mutator.kind {
                MutatorKind::BottomUp { f, parallel } => {
                    self.run_visit(&mutator.name, &**f, *parallel, false)?
                }
                MutatorKind::TopDown { f, parallel } => {
                    self.run_visit(&mutator.name, &**f, *parallel, true)?
                }
                MutatorKind::Transition(entry) => {
                    if mutator.phase == MutatorPhase::FinalDeps {
                        panic!("TransitionMutator not allowed in FinalDepsMutators");
                    }
                    self.run_transition(entry)?
                }
            }
            self.apply_renames();
            tracing::debug!(
                "Mutator {} ({}) finished in {:?}",
                mutator.name,
                mutator.phase,
                start.elapsed()
            );
            self.errors().take_result()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &mut BottomUpMutatorContext<'_>) {}

    #[test]
    fn test_collate_order() {
        let mut registry = MutatorRegistry::new();
        registry
            .final_deps(|ctx| {
                ctx.bottom_up("last", noop);
            })
            .pre_arch(|ctx| {
                ctx.bottom_up("first", noop);
            })
            .post_deps(|ctx| {
                ctx.top_down("middle", noop).parallel();
            });
        let mutators = registry.collate();
        let names: Vec<_> = mutators.iter().map(|m| m.name()).collect();
        assert_eq!(vec!["first", "deps", "middle", "last"], names);
        let phases: Vec<_> = mutators.iter().map(|m| m.phase()).collect();
        assert_eq!(
            vec![
                MutatorPhase::PreArch,
                MutatorPhase::Deps,
                MutatorPhase::PostDeps,
                MutatorPhase::FinalDeps
            ],
            phases
        );
    }
}
