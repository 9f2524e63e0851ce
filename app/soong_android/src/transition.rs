/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Transition mutators.
//!
//! A transition mutator splits modules along one variation dimension. The
//! variation of a dependency edge is negotiated: the depending module asks
//! for a variation in its outgoing transition, and the dependency has the
//! final say in its incoming transition. The engine (see `graph.rs`) only
//! deals in type-erased infos keyed by their variation string; the typed
//! mutators below are adapted onto that.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::context::BaseModuleContext;
use crate::context::BottomUpMutatorContext;
use crate::context::IncomingTransitionContext;
use crate::context::OutgoingTransitionContext;

/// Payload threaded through a transition. The variation string identifies
/// the variant the payload belongs to.
///
/// Equal payloads must have equal variations. Payloads with the same
/// variation may still differ, as two APEXes merged into one variant do.
pub trait TransitionInfo: Clone + PartialEq + Send + Sync + 'static {
    fn variation(&self) -> String;
}

impl TransitionInfo for String {
    fn variation(&self) -> String {
        self.clone()
    }
}

/// A transition mutator over a typed payload.
pub trait TransitionInfoMutator: Send + Sync + 'static {
    type Info: TransitionInfo;

    /// Variations the module needs regardless of who depends on it. Must not
    /// mutate the module.
    fn split(&self, ctx: &BaseModuleContext<'_>) -> Vec<Self::Info>;

    /// What the depending module wants from the dependency on this edge.
    fn outgoing_transition(
        &self,
        ctx: &OutgoingTransitionContext<'_>,
        source: &Self::Info,
    ) -> Self::Info;

    /// The variation the dependency ends up in.
    fn incoming_transition(
        &self,
        ctx: &IncomingTransitionContext<'_>,
        incoming: &Self::Info,
    ) -> Self::Info;

    /// Called once on every variant after it was created.
    fn mutate(&self, ctx: &mut BottomUpMutatorContext<'_>, info: &Self::Info);

    /// Payload for a variation requested explicitly when adding a
    /// dependency.
    fn transition_info_from_variation(&self, variation: &str) -> Self::Info;
}

/// A transition mutator whose payload is the variation string itself.
pub trait VariationTransitionMutator: Send + Sync + 'static {
    fn split(&self, ctx: &BaseModuleContext<'_>) -> Vec<String>;

    fn outgoing_transition(&self, ctx: &OutgoingTransitionContext<'_>, source: &str) -> String;

    fn incoming_transition(&self, ctx: &IncomingTransitionContext<'_>, incoming: &str) -> String;

    fn mutate(&self, ctx: &mut BottomUpMutatorContext<'_>, variation: &str);
}

/// Adapts a [`VariationTransitionMutator`] to the typed interface.
pub struct VariationTransitionAdapter<M>(pub M);

impl<M: VariationTransitionMutator> TransitionInfoMutator for VariationTransitionAdapter<M> {
    type Info = String;

    fn split(&self, ctx: &BaseModuleContext<'_>) -> Vec<String> {
        self.0.split(ctx)
    }

    fn outgoing_transition(&self, ctx: &OutgoingTransitionContext<'_>, source: &String) -> String {
        self.0.outgoing_transition(ctx, source)
    }

    fn incoming_transition(
        &self,
        ctx: &IncomingTransitionContext<'_>,
        incoming: &String,
    ) -> String {
        self.0.incoming_transition(ctx, incoming)
    }

    fn mutate(&self, ctx: &mut BottomUpMutatorContext<'_>, info: &String) {
        self.0.mutate(ctx, info)
    }

    fn transition_info_from_variation(&self, variation: &str) -> String {
        variation.to_owned()
    }
}

/// A type-erased transition payload together with its variation.
#[derive(Clone)]
pub(crate) struct AnyTransitionInfo {
    pub(crate) variation: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for AnyTransitionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyTransitionInfo")
            .field(&self.variation)
            .finish()
    }
}

impl AnyTransitionInfo {
    fn new<T: TransitionInfo>(info: T) -> AnyTransitionInfo {
        AnyTransitionInfo {
            variation: info.variation(),
            value: Arc::new(info),
        }
    }

    fn get<T: TransitionInfo>(&self) -> &T {
        match self.value.downcast_ref::<T>() {
            Some(info) => info,
            None => panic!(
                "transition info for variation {:?} has an unexpected type",
                self.variation
            ),
        }
    }
}

pub(crate) trait ErasedTransitionMutator: Send + Sync {
    fn split(&self, ctx: &BaseModuleContext<'_>) -> Vec<AnyTransitionInfo>;

    fn outgoing(
        &self,
        ctx: &OutgoingTransitionContext<'_>,
        source: &AnyTransitionInfo,
    ) -> AnyTransitionInfo;

    fn incoming(
        &self,
        ctx: &IncomingTransitionContext<'_>,
        incoming: &AnyTransitionInfo,
    ) -> AnyTransitionInfo;

    fn mutate(&self, ctx: &mut BottomUpMutatorContext<'_>, info: &AnyTransitionInfo);

    fn info_from_variation(&self, variation: &str) -> AnyTransitionInfo;
}

struct Erased<M>(M);

impl<M: TransitionInfoMutator> ErasedTransitionMutator for Erased<M> {
    fn split(&self, ctx: &BaseModuleContext<'_>) -> Vec<AnyTransitionInfo> {
        self.0
            .split(ctx)
            .into_iter()
            .map(AnyTransitionInfo::new)
            .collect()
    }

    fn outgoing(
        &self,
        ctx: &OutgoingTransitionContext<'_>,
        source: &AnyTransitionInfo,
    ) -> AnyTransitionInfo {
        AnyTransitionInfo::new(self.0.outgoing_transition(ctx, source.get::<M::Info>()))
    }

    fn incoming(
        &self,
        ctx: &IncomingTransitionContext<'_>,
        incoming: &AnyTransitionInfo,
    ) -> AnyTransitionInfo {
        AnyTransitionInfo::new(self.0.incoming_transition(ctx, incoming.get::<M::Info>()))
    }

    fn mutate(&self, ctx: &mut BottomUpMutatorContext<'_>, info: &AnyTransitionInfo) {
        self.0.mutate(ctx, info.get::<M::Info>())
    }

    fn info_from_variation(&self, variation: &str) -> AnyTransitionInfo {
        AnyTransitionInfo::new(self.0.transition_info_from_variation(variation))
    }
}

/// A registered transition mutator.
pub(crate) struct TransitionEntry {
    pub(crate) name: String,
    pub(crate) mutator: Box<dyn ErasedTransitionMutator>,
}

impl TransitionEntry {
    pub(crate) fn new<M: TransitionInfoMutator>(name: &str, mutator: M) -> TransitionEntry {
        TransitionEntry {
            name: name.to_owned(),
            mutator: Box::new(Erased(mutator)),
        }
    }
}

impl fmt::Debug for TransitionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionEntry")
            .field("name", &self.name)
            .finish()
    }
}
