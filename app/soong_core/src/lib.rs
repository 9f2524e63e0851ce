/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Build-session plumbing shared by the analysis crates: configuration,
//! API levels, batched diagnostics and logging setup.

pub mod api_level;
pub mod config;
pub mod errors;
pub mod logging;
pub mod shell;
