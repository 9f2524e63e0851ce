/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Configuration of a single build invocation.
//!
//! Everything that would otherwise be read from process globals (environment,
//! product variables, mixed build allowlists) is captured here once and passed
//! down explicitly.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use dupe::Dupe;
use serde::Deserialize;

#[derive(
    Debug,
    Clone,
    Copy,
    Dupe,
    PartialEq,
    Eq,
    Default,
    derive_more::Display,
    Deserialize
)]
pub enum BazelMode {
    #[default]
    #[display("disabled")]
    Disabled,
    #[display("prod")]
    Prod,
    #[display("staging")]
    Staging,
    #[display("dev")]
    Dev,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown bazel mode `{0}`, expected one of: disabled, prod, staging, dev")]
    UnknownBazelMode(String),
    #[error("Product variables file `{0}` does not exist")]
    MissingProductVariables(PathBuf),
}

impl FromStr for BazelMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<BazelMode, ConfigError> {
        match s {
            "disabled" => Ok(BazelMode::Disabled),
            "prod" => Ok(BazelMode::Prod),
            "staging" => Ok(BazelMode::Staging),
            "dev" => Ok(BazelMode::Dev),
            _ => Err(ConfigError::UnknownBazelMode(s.to_owned())),
        }
    }
}

/// The subset of product variables the analysis core reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductVariables {
    #[serde(rename = "Platform_version_active_codenames")]
    pub platform_version_active_codenames: Vec<String>,
    #[serde(rename = "Allow_missing_dependencies")]
    pub allow_missing_dependencies: Option<bool>,
    #[serde(rename = "ClangCoverage")]
    pub clang_coverage: Option<bool>,
    #[serde(rename = "NativeCoverage")]
    pub native_coverage: Option<bool>,
    #[serde(rename = "NativeCoveragePaths")]
    pub native_coverage_paths: Vec<String>,
    #[serde(rename = "NativeCoverageExcludePaths")]
    pub native_coverage_exclude_paths: Vec<String>,
}

/// Module allowlists consulted when mixed builds are enabled.
#[derive(Debug, Clone, Default)]
pub struct MixedBuildsAllowlists {
    pub prod_enabled: Vec<String>,
    pub staging_enabled: Vec<String>,
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    env: HashMap<String, String>,
    product_variables: ProductVariables,
    soong_out_dir: PathBuf,
    bazel_mode: BazelMode,
    bazel_modules_force_enabled: BTreeSet<String>,
    allowlists: MixedBuildsAllowlists,
}

impl BuildConfig {
    /// A configuration with an empty environment.
    pub fn new(soong_out_dir: impl Into<PathBuf>) -> BuildConfig {
        BuildConfig {
            env: HashMap::new(),
            product_variables: ProductVariables::default(),
            soong_out_dir: soong_out_dir.into(),
            bazel_mode: BazelMode::Disabled,
            bazel_modules_force_enabled: BTreeSet::new(),
            allowlists: MixedBuildsAllowlists::default(),
        }
    }

    /// Snapshot the process environment. Later changes to the environment
    /// are not observed.
    pub fn from_env(soong_out_dir: impl Into<PathBuf>) -> BuildConfig {
        let mut config = BuildConfig::new(soong_out_dir);
        config.env = std::env::vars().collect();
        tracing::debug!("Captured {} environment variables", config.env.len());
        config
    }

    pub fn with_env(mut self, key: &str, value: &str) -> BuildConfig {
        self.env.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn with_product_variables(mut self, vars: ProductVariables) -> BuildConfig {
        self.product_variables = vars;
        self
    }

    pub fn with_product_variables_json(self, json: &str) -> anyhow::Result<BuildConfig> {
        let vars: ProductVariables =
            serde_json::from_str(json).context("Error parsing product variables")?;
        Ok(self.with_product_variables(vars))
    }

    pub fn with_product_variables_file(self, path: &Path) -> anyhow::Result<BuildConfig> {
        if !path.exists() {
            return Err(ConfigError::MissingProductVariables(path.to_owned()).into());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Error reading `{}`", path.display()))?;
        self.with_product_variables_json(&json)
    }

    pub fn with_bazel_mode(mut self, mode: BazelMode) -> BuildConfig {
        self.bazel_mode = mode;
        self
    }

    pub fn with_mixed_builds_allowlists(mut self, allowlists: MixedBuildsAllowlists) -> BuildConfig {
        self.allowlists = allowlists;
        self
    }

    pub fn with_bazel_modules_force_enabled<I, S>(mut self, modules: I) -> BuildConfig
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bazel_modules_force_enabled
            .extend(modules.into_iter().map(Into::into));
        self
    }

    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn is_env_true(&self, key: &str) -> bool {
        matches!(
            self.getenv(key).map(str::to_lowercase).as_deref(),
            Some("1" | "y" | "yes" | "on" | "true")
        )
    }

    pub fn is_env_false(&self, key: &str) -> bool {
        matches!(
            self.getenv(key).map(str::to_lowercase).as_deref(),
            Some("0" | "n" | "no" | "off" | "false")
        )
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn allow_missing_dependencies(&self) -> bool {
        self.product_variables
            .allow_missing_dependencies
            .unwrap_or(false)
    }

    pub fn native_coverage_enabled(&self) -> bool {
        self.product_variables.native_coverage.unwrap_or(false)
    }

    pub fn clang_coverage_enabled(&self) -> bool {
        self.product_variables.clang_coverage.unwrap_or(false)
    }

    pub fn product_variables(&self) -> &ProductVariables {
        &self.product_variables
    }

    pub fn active_codenames(&self) -> &[String] {
        &self.product_variables.platform_version_active_codenames
    }

    pub fn soong_out_dir(&self) -> &Path {
        &self.soong_out_dir
    }

    pub fn bazel_mode(&self) -> BazelMode {
        self.bazel_mode
    }

    pub fn is_mixed_builds_enabled(&self) -> bool {
        self.bazel_mode != BazelMode::Disabled
    }

    pub fn bazel_modules_force_enabled(&self) -> &BTreeSet<String> {
        &self.bazel_modules_force_enabled
    }

    pub fn mixed_builds_allowlists(&self) -> &MixedBuildsAllowlists {
        &self.allowlists
    }
}
