/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Analysis of the Android module graph.
//!
//! Modules are split into variants by transition mutators (image, APEX),
//! pass results to each other through providers, and package the files their
//! dependencies install.

pub mod apex;
pub mod context;
pub mod graph;
pub mod image;
pub mod mixed_builds;
pub mod module;
pub mod mutator;
pub mod packaging;
pub mod provider;
pub mod session;
pub mod transition;

#[cfg(test)]
mod testing;
