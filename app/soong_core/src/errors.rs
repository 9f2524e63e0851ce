/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Diagnostics reported against modules and their properties.
//!
//! User errors do not stop analysis. They are collected while a mutator pass
//! runs and reported together once the pass is over.

use std::fmt;

use itertools::Itertools;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleError {
    pub module: String,
    pub property: Option<String>,
    pub message: String,
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "module {:?}: {}: {}", self.module, property, self.message),
            None => write!(f, "module {:?}: {}", self.module, self.message),
        }
    }
}

fn join_errors(errors: &[ModuleError]) -> String {
    errors.iter().join("\n")
}

/// All errors of a failed phase.
#[derive(Debug, thiserror::Error)]
#[error("{}", join_errors(.errors))]
pub struct BuildErrors {
    pub errors: Vec<ModuleError>,
}

impl BuildErrors {
    /// Whether any error message contains `pattern`.
    pub fn contains(&self, pattern: &str) -> bool {
        self.errors.iter().any(|e| e.message.contains(pattern))
    }
}

/// Thread-safe accumulator shared by all visits of a pass.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Mutex<Vec<ModuleError>>,
}

impl ErrorCollector {
    pub fn new() -> ErrorCollector {
        ErrorCollector::default()
    }

    pub fn module_error(&self, module: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("module error in {}: {}", module, message);
        self.errors.lock().push(ModuleError {
            module: module.to_owned(),
            property: None,
            message,
        });
    }

    pub fn property_error(&self, module: &str, property: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("property error in {}.{}: {}", module, property, message);
        self.errors.lock().push(ModuleError {
            module: module.to_owned(),
            property: Some(property.to_owned()),
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    /// Drain everything reported so far. An error reported more than once
    /// is kept once, at its first position.
    pub fn take(&self) -> Vec<ModuleError> {
        std::mem::take(&mut *self.errors.lock())
            .into_iter()
            .unique()
            .collect()
    }

    /// Drain the collector, failing if anything was reported.
    pub fn take_result(&self) -> Result<(), BuildErrors> {
        let errors = self.take();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BuildErrors { errors })
        }
    }
}
