/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The bridge to Bazel used by mixed builds.
//!
//! Modules queue cquery requests during analysis. A single invocation then
//! runs cquery for all of them, aquery for the action graph, and a build of
//! the phony root to materialize symlink forests. Results are read back by the
//! modules afterwards.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use anyhow::Context;
use dupe::Dupe;
use itertools::Itertools;
use parking_lot::Mutex;
use parking_lot::RwLock;
use soong_core::config::BazelMode;
use soong_core::config::BuildConfig;

use crate::aquery::aquery_build_statements;
use crate::aquery::AqueryDepset;
use crate::aquery::BuildStatement;
use crate::cquery::cquery_starlark_file_contents;
use crate::cquery::main_build_file_contents;
use crate::cquery::parse_cquery_output;
use crate::cquery::parse_output_files;
use crate::cquery::parse_python_binary;
use crate::cquery::ConfigKey;
use crate::cquery::CqueryKey;
use crate::cquery::RequestType;
use crate::cquery::BUILDROOT_LABEL;
use crate::cquery::MAIN_BZL_FILE_CONTENTS;
use crate::cquery::PHONYROOT_LABEL;

/// Name of the repository Soong injects into the Bazel workspace.
pub const SOONG_INJECTION_DIR_NAME: &str = "soong_injection";

const REQUIRED_ENV_VARS: &[&str] = &[
    "BAZEL_HOME",
    "BAZEL_PATH",
    "BAZEL_OUTPUT_BASE",
    "BAZEL_WORKSPACE",
    "BAZEL_METRICS_DIR",
    "BAZEL_DEPS_FILE",
];

#[derive(Debug, thiserror::Error)]
pub enum BazelError {
    #[error("missing required env vars to use bazel: [{}]", .0.join(" "))]
    MissingEnvVars(Vec<String>),
    #[error("missing result for bazel target {id}. query output: [{output}], cquery err: [{stderr}]")]
    MissingResult {
        id: String,
        output: String,
        stderr: String,
    },
    #[error("no bazel response found for {0}")]
    NoResponse(CqueryKey),
    #[error("bazel command failed: {status}\n---command---\n{command}\n---env---\n{env}\n---stderr---\n{stderr}---")]
    CommandFailed {
        status: String,
        command: String,
        env: String,
        stderr: String,
    },
    #[error("mixed builds are disabled")]
    Disabled,
}

/// Locations Bazel is run with, all taken from the environment.
#[derive(Debug, Clone)]
pub struct BazelPaths {
    pub home_dir: String,
    pub bazel_path: String,
    pub output_base: String,
    pub workspace_dir: String,
    pub soong_out_dir: PathBuf,
    pub metrics_dir: String,
    pub bazel_deps_file: String,
}

impl BazelPaths {
    pub fn from_config(config: &BuildConfig) -> Result<BazelPaths, BazelError> {
        let mut values = HashMap::new();
        let mut missing = Vec::new();
        for var in REQUIRED_ENV_VARS {
            match config.getenv(var) {
                Some(v) if v.len() > 1 => {
                    values.insert(*var, v.to_owned());
                }
                _ => missing.push((*var).to_owned()),
            }
        }
        if !missing.is_empty() {
            return Err(BazelError::MissingEnvVars(missing));
        }
        let mut take = |var: &str| values.remove(var).unwrap_or_default();
        Ok(BazelPaths {
            home_dir: take("BAZEL_HOME"),
            bazel_path: take("BAZEL_PATH"),
            output_base: take("BAZEL_OUTPUT_BASE"),
            workspace_dir: take("BAZEL_WORKSPACE"),
            metrics_dir: take("BAZEL_METRICS_DIR"),
            bazel_deps_file: take("BAZEL_DEPS_FILE"),
            soong_out_dir: config.soong_out_dir().to_path_buf(),
        })
    }

    /// Root of the `@soong_injection` repository.
    pub fn injected_files_dir(&self) -> PathBuf {
        self.soong_out_dir.join(SOONG_INJECTION_DIR_NAME)
    }

    /// The synthetic workspace Bazel runs in.
    pub fn synthetic_workspace_dir(&self) -> PathBuf {
        self.soong_out_dir.join("workspace")
    }

    /// The top level out directory.
    pub fn out_dir(&self) -> PathBuf {
        self.soong_out_dir
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    pub fn metrics_filename(&self, run_name: RunName) -> PathBuf {
        Path::new(&self.metrics_dir).join(format!("{}_bazel_profile.gz", run_name))
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq, derive_more::Display)]
pub enum RunName {
    #[display("cquery-buildroot")]
    CqueryBuildRoot,
    #[display("aquery-buildroot")]
    AqueryBuildRoot,
    #[display("bazel-build-phonyroot")]
    BuildPhonyRoot,
}

/// A Bazel command and the query or label it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BazelCommand {
    pub command: String,
    pub expression: String,
}

impl BazelCommand {
    pub fn cquery() -> BazelCommand {
        BazelCommand {
            command: "cquery".to_owned(),
            expression: format!("deps({}, 2)", BUILDROOT_LABEL),
        }
    }

    pub fn aquery() -> BazelCommand {
        BazelCommand {
            command: "aquery".to_owned(),
            expression: format!("deps({})", BUILDROOT_LABEL),
        }
    }

    pub fn build() -> BazelCommand {
        BazelCommand {
            command: "build".to_owned(),
            expression: PHONYROOT_LABEL.to_owned(),
        }
    }
}

/// A fully prepared Bazel process invocation.
#[derive(Debug, Clone)]
pub struct BazelInvocation {
    pub command: BazelCommand,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub dir: PathBuf,
}

impl BazelInvocation {
    pub fn env_lines(&self) -> String {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .join("\n")
    }

    pub fn printable(&self) -> String {
        format!(
            "{} \"{}\" \"{}\"",
            self.env.iter().map(|(k, v)| format!("{}={}", k, v)).join(" "),
            self.program.display(),
            self.args.join("\" \"")
        )
    }
}

/// Builds the invocation for `command`. Flags common to every run come first,
/// then `extra_flags`.
pub fn create_bazel_command(
    paths: &BazelPaths,
    run_name: RunName,
    command: &BazelCommand,
    extra_flags: &[String],
) -> BazelInvocation {
    let mut args = vec![
        format!(
            "--output_base={}",
            absolute_path(Path::new(&paths.output_base)).display()
        ),
        command.command.clone(),
        command.expression.clone(),
        format!("--profile={}", paths.metrics_filename(run_name).display()),
        // Canonical platforms, as labels from the bazelrc are not valid from
        // the buildroot.
        "--extra_toolchains=//prebuilts/clang/host/linux-x86:all".to_owned(),
        "--host_platform=//build/bazel/platforms:linux_x86_64".to_owned(),
        "--experimental_repository_disable_download".to_owned(),
        "--ui_event_filters=-INFO".to_owned(),
        "--noshow_progress".to_owned(),
        "--norun_validations".to_owned(),
    ];
    args.extend(extra_flags.iter().cloned());

    let mut env = vec![("HOME".to_owned(), paths.home_dir.clone())];
    // No /proc on darwin.
    if !cfg!(target_os = "macos") {
        env.push(("PWD".to_owned(), "/proc/self/cwd".to_owned()));
    }
    env.push((
        "BUILD_DIR".to_owned(),
        absolute_path(&paths.soong_out_dir).display().to_string(),
    ));
    env.push((
        "OUT_DIR".to_owned(),
        absolute_path(&paths.out_dir()).display().to_string(),
    ));
    env.push((
        "BAZEL_DO_NOT_DETECT_CPP_TOOLCHAIN".to_owned(),
        "1".to_owned(),
    ));

    BazelInvocation {
        command: command.clone(),
        program: PathBuf::from(&paths.bazel_path),
        args,
        env,
        dir: absolute_path(&paths.synthetic_workspace_dir()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct BazelOutput {
    pub stdout: String,
    pub stderr: String,
}

pub trait BazelRunner: Send + Sync {
    fn issue_bazel_command(&self, invocation: &BazelInvocation) -> anyhow::Result<BazelOutput>;
}

/// Runs Bazel as a child process.
#[derive(Debug, Default)]
pub struct BuiltinBazelRunner;

impl BazelRunner for BuiltinBazelRunner {
    fn issue_bazel_command(&self, invocation: &BazelInvocation) -> anyhow::Result<BazelOutput> {
        tracing::info!("Running {}", invocation.printable());
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&invocation.dir)
            .output()
            .with_context(|| format!("Error spawning `{}`", invocation.program.display()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(BazelError::CommandFailed {
                status: output.status.to_string(),
                command: invocation.printable(),
                env: invocation.env_lines(),
                stderr,
            }
            .into());
        }
        Ok(BazelOutput { stdout, stderr })
    }
}

/// Records invocations and answers them from canned outputs.
#[derive(Debug, Default)]
pub struct MockBazelRunner {
    results: HashMap<BazelCommand, String>,
    invocations: Mutex<Vec<BazelInvocation>>,
}

impl MockBazelRunner {
    pub fn new() -> MockBazelRunner {
        MockBazelRunner::default()
    }

    pub fn with_result(mut self, command: BazelCommand, stdout: impl Into<String>) -> MockBazelRunner {
        self.results.insert(command, stdout.into());
        self
    }

    pub fn invocations(&self) -> Vec<BazelInvocation> {
        self.invocations.lock().clone()
    }
}

impl BazelRunner for MockBazelRunner {
    fn issue_bazel_command(&self, invocation: &BazelInvocation) -> anyhow::Result<BazelOutput> {
        self.invocations.lock().push(invocation.clone());
        Ok(BazelOutput {
            stdout: self
                .results
                .get(&invocation.command)
                .cloned()
                .unwrap_or_default(),
            stderr: String::new(),
        })
    }
}

/// Interaction with Bazel during analysis. Evaluating part of the build
/// graph with Bazel is a "mixed build".
pub trait BazelContext: Send + Sync {
    /// Queue a request answered by the next [`BazelContext::invoke_bazel`].
    fn queue_bazel_request(&self, label: &str, request: RequestType, config: ConfigKey);

    fn get_output_files(&self, label: &str, config: ConfigKey) -> anyhow::Result<Vec<String>>;

    fn get_python_binary(&self, label: &str, config: ConfigKey) -> anyhow::Result<String>;

    /// Answer all queued requests.
    fn invoke_bazel(&self, config: &BuildConfig) -> anyhow::Result<()>;

    /// Whether the module is allowlisted for mixed builds. The module still
    /// needs to support being built by Bazel.
    fn bazel_allowlisted(&self, module_name: &str) -> bool;

    fn output_base(&self) -> String;

    fn build_statements_to_register(&self) -> Vec<BuildStatement>;

    fn aquery_depsets(&self) -> Vec<AqueryDepset>;
}

/// Creates the context matching the configured bazel mode.
pub fn new_bazel_context(config: &BuildConfig) -> anyhow::Result<Arc<dyn BazelContext>> {
    new_bazel_context_with_runner(config, Arc::new(BuiltinBazelRunner))
}

pub fn new_bazel_context_with_runner(
    config: &BuildConfig,
    runner: Arc<dyn BazelRunner>,
) -> anyhow::Result<Arc<dyn BazelContext>> {
    let allowlists = config.mixed_builds_allowlists();
    let mut enabled_modules = HashSet::new();
    let mut disabled_modules = HashSet::new();
    let modules_default_to_bazel = match config.bazel_mode() {
        BazelMode::Disabled => return Ok(Arc::new(NoopBazelContext)),
        BazelMode::Prod => {
            enabled_modules.extend(allowlists.prod_enabled.iter().cloned());
            enabled_modules.extend(config.bazel_modules_force_enabled().iter().cloned());
            false
        }
        BazelMode::Staging => {
            enabled_modules.extend(allowlists.prod_enabled.iter().cloned());
            enabled_modules.extend(allowlists.staging_enabled.iter().cloned());
            enabled_modules.extend(config.bazel_modules_force_enabled().iter().cloned());
            false
        }
        BazelMode::Dev => {
            disabled_modules.extend(allowlists.disabled.iter().cloned());
            true
        }
    };
    let paths = BazelPaths::from_config(config)?;
    tracing::debug!(
        "Mixed builds enabled in {} mode with {} allowlisted modules",
        config.bazel_mode(),
        enabled_modules.len()
    );
    Ok(Arc::new(BazelContextImpl {
        runner,
        paths,
        requests: Mutex::new(BTreeSet::new()),
        results: RwLock::new(HashMap::new()),
        build_statements: RwLock::new(Vec::new()),
        depsets: RwLock::new(Vec::new()),
        enabled_modules,
        disabled_modules,
        modules_default_to_bazel,
    }))
}

/// Tracks queued requests and the results of the last invocation.
pub struct BazelContextImpl {
    runner: Arc<dyn BazelRunner>,
    paths: BazelPaths,
    /// Requests not yet sent to Bazel. Queued from parallel mutators.
    requests: Mutex<BTreeSet<CqueryKey>>,
    results: RwLock<HashMap<CqueryKey, String>>,
    build_statements: RwLock<Vec<BuildStatement>>,
    depsets: RwLock<Vec<AqueryDepset>>,
    enabled_modules: HashSet<String>,
    disabled_modules: HashSet<String>,
    modules_default_to_bazel: bool,
}

impl BazelContextImpl {
    fn result(&self, key: &CqueryKey) -> Result<String, BazelError> {
        self.results
            .read()
            .get(key)
            .map(|raw| raw.trim().to_owned())
            .ok_or_else(|| BazelError::NoResponse(key.clone()))
    }

    fn issue(
        &self,
        run_name: RunName,
        command: &BazelCommand,
        extra_flags: &[String],
    ) -> anyhow::Result<(BazelInvocation, BazelOutput)> {
        let invocation = create_bazel_command(&self.paths, run_name, command, extra_flags);
        let output = self.runner.issue_bazel_command(&invocation)?;
        Ok((invocation, output))
    }

    fn run_cquery(&self) -> anyhow::Result<()> {
        let injection_dir = absolute_path(&self.paths.injected_files_dir());
        let mixed_builds_dir = injection_dir.join("mixed_builds");
        std::fs::create_dir_all(&mixed_builds_dir)
            .with_context(|| format!("Error creating `{}`", mixed_builds_dir.display()))?;

        let requests = self.requests.lock().clone();
        let cquery_file = injection_dir.join("buildroot.cquery");
        for (path, contents) in [
            (injection_dir.join("WORKSPACE.bazel"), String::new()),
            (
                mixed_builds_dir.join("main.bzl"),
                MAIN_BZL_FILE_CONTENTS.to_owned(),
            ),
            (
                mixed_builds_dir.join("BUILD.bazel"),
                main_build_file_contents(&requests),
            ),
            (cquery_file.clone(), cquery_starlark_file_contents(&requests)),
        ] {
            std::fs::write(&path, contents)
                .with_context(|| format!("Error writing `{}`", path.display()))?;
        }

        let (invocation, output) = self.issue(
            RunName::CqueryBuildRoot,
            &BazelCommand::cquery(),
            &[
                "--output=starlark".to_owned(),
                format!("--starlark:file={}", cquery_file.display()),
            ],
        )?;
        let log = format!(
            "cquery command line:\n  {} \n\n\n{}",
            invocation.printable(),
            output.stdout
        );
        let log_path = injection_dir.join("cquery.out");
        std::fs::write(&log_path, log)
            .with_context(|| format!("Error writing `{}`", log_path.display()))?;

        let by_id = parse_cquery_output(&output.stdout);
        let mut results = self.results.write();
        for key in &requests {
            let id = key.cquery_id();
            match by_id.get(&id) {
                Some(result) => {
                    results.insert(key.clone(), result.clone());
                }
                None => {
                    return Err(BazelError::MissingResult {
                        id,
                        output: output.stdout,
                        stderr: output.stderr,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn run_aquery(&self, config: &BuildConfig) -> anyhow::Result<()> {
        let mut flags = vec![
            "--output=jsonproto".to_owned(),
            "--include_file_write_contents".to_owned(),
        ];
        if config.clang_coverage_enabled() {
            flags.push("--collect_code_coverage".to_owned());
            let vars = config.product_variables();
            let mut filters = Vec::new();
            if !vars.native_coverage_paths.is_empty() {
                filters.push(
                    vars.native_coverage_paths
                        .iter()
                        .map(|p| format!("+{}", if p == "*" { ".*" } else { p.as_str() }))
                        .join(","),
                );
            }
            if !vars.native_coverage_exclude_paths.is_empty() {
                filters.push(
                    vars.native_coverage_exclude_paths
                        .iter()
                        .map(|p| format!("-{}", p))
                        .join(","),
                );
            }
            if !filters.is_empty() {
                flags.push(format!("--instrumentation_filter={}", filters.join(",")));
            }
        }
        let (_, output) = self.issue(RunName::AqueryBuildRoot, &BazelCommand::aquery(), &flags)?;
        let (statements, depsets) = aquery_build_statements(output.stdout.as_bytes())?;
        *self.build_statements.write() = statements;
        *self.depsets.write() = depsets;
        Ok(())
    }

    /// aquery does not create the symlink forests some sources resolve
    /// through, building the phony root does.
    fn generate_bazel_symlinks(&self) -> anyhow::Result<()> {
        self.issue(RunName::BuildPhonyRoot, &BazelCommand::build(), &[])?;
        Ok(())
    }
}

impl BazelContext for BazelContextImpl {
    fn queue_bazel_request(&self, label: &str, request: RequestType, config: ConfigKey) {
        let key = CqueryKey::new(label, request, config);
        tracing::debug!("Queueing {}", key);
        self.requests.lock().insert(key);
    }

    fn get_output_files(&self, label: &str, config: ConfigKey) -> anyhow::Result<Vec<String>> {
        let key = CqueryKey::new(label, RequestType::GetOutputFiles, config);
        Ok(parse_output_files(&self.result(&key)?))
    }

    fn get_python_binary(&self, label: &str, config: ConfigKey) -> anyhow::Result<String> {
        let key = CqueryKey::new(label, RequestType::GetPythonBinary, config);
        Ok(parse_python_binary(&self.result(&key)?))
    }

    fn invoke_bazel(&self, config: &BuildConfig) -> anyhow::Result<()> {
        if !self.paths.metrics_dir.is_empty() {
            std::fs::create_dir_all(&self.paths.metrics_dir).with_context(|| {
                format!("Error creating metrics dir `{}`", self.paths.metrics_dir)
            })?;
        }
        self.results.write().clear();
        let result = self
            .run_cquery()
            .and_then(|()| self.run_aquery(config))
            .and_then(|()| self.generate_bazel_symlinks());
        // A failed invocation does not resubmit its requests.
        self.requests.lock().clear();
        result
    }

    fn bazel_allowlisted(&self, module_name: &str) -> bool {
        if self.disabled_modules.contains(module_name) {
            return false;
        }
        if self.enabled_modules.contains(module_name) {
            return true;
        }
        self.modules_default_to_bazel
    }

    fn output_base(&self) -> String {
        self.paths.output_base.clone()
    }

    fn build_statements_to_register(&self) -> Vec<BuildStatement> {
        self.build_statements.read().clone()
    }

    fn aquery_depsets(&self) -> Vec<AqueryDepset> {
        self.depsets.read().clone()
    }
}

/// Used when mixed builds are disabled.
#[derive(Debug, Default)]
pub struct NoopBazelContext;

impl BazelContext for NoopBazelContext {
    fn queue_bazel_request(&self, label: &str, _request: RequestType, _config: ConfigKey) {
        panic!("cannot queue bazel request for {} when mixed builds are disabled", label)
    }

    fn get_output_files(&self, _label: &str, _config: ConfigKey) -> anyhow::Result<Vec<String>> {
        Err(BazelError::Disabled.into())
    }

    fn get_python_binary(&self, _label: &str, _config: ConfigKey) -> anyhow::Result<String> {
        Err(BazelError::Disabled.into())
    }

    fn invoke_bazel(&self, _config: &BuildConfig) -> anyhow::Result<()> {
        Err(BazelError::Disabled.into())
    }

    fn bazel_allowlisted(&self, _module_name: &str) -> bool {
        false
    }

    fn output_base(&self) -> String {
        String::new()
    }

    fn build_statements_to_register(&self) -> Vec<BuildStatement> {
        Vec::new()
    }

    fn aquery_depsets(&self) -> Vec<AqueryDepset> {
        Vec::new()
    }
}

/// Answers requests from fixed tables and records what was queued.
#[derive(Debug, Default)]
pub struct MockBazelContext {
    pub output_base: String,
    pub label_to_output_files: HashMap<String, Vec<String>>,
    pub label_to_python_binary: HashMap<String, String>,
    pub build_statements: Vec<BuildStatement>,
    pub depsets: Vec<AqueryDepset>,
    /// Every module is allowlisted unless listed here.
    pub disabled_modules: HashSet<String>,
    pub queued: Mutex<Vec<CqueryKey>>,
}

impl MockBazelContext {
    pub fn queued_requests(&self) -> Vec<CqueryKey> {
        self.queued.lock().clone()
    }
}

impl BazelContext for MockBazelContext {
    fn queue_bazel_request(&self, label: &str, request: RequestType, config: ConfigKey) {
        self.queued
            .lock()
            .push(CqueryKey::new(label, request, config));
    }

    fn get_output_files(&self, label: &str, _config: ConfigKey) -> anyhow::Result<Vec<String>> {
        Ok(self
            .label_to_output_files
            .get(label)
            .cloned()
            .unwrap_or_default())
    }

    fn get_python_binary(&self, label: &str, _config: ConfigKey) -> anyhow::Result<String> {
        Ok(self
            .label_to_python_binary
            .get(label)
            .cloned()
            .unwrap_or_default())
    }

    fn invoke_bazel(&self, _config: &BuildConfig) -> anyhow::Result<()> {
        Ok(())
    }

    fn bazel_allowlisted(&self, module_name: &str) -> bool {
        !self.disabled_modules.contains(module_name)
    }

    fn output_base(&self) -> String {
        self.output_base.clone()
    }

    fn build_statements_to_register(&self) -> Vec<BuildStatement> {
        self.build_statements.clone()
    }

    fn aquery_depsets(&self) -> Vec<AqueryDepset> {
        self.depsets.clone()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use maplit::hashmap;
    use maplit::hashset;
    use soong_core::config::MixedBuildsAllowlists;

    use super::*;
    use crate::cquery::OsType;

    fn config_with_env() -> BuildConfig {
        let mut config = BuildConfig::new("/out/soong");
        for var in REQUIRED_ENV_VARS {
            config = config.with_env(var, &format!("/bazel/{}", var.to_lowercase()));
        }
        config
    }

    #[test]
    fn test_missing_env_vars() {
        let config = BuildConfig::new("/out/soong").with_env("BAZEL_HOME", "/home");
        let err = BazelPaths::from_config(&config).unwrap_err();
        assert_matches!(&err, BazelError::MissingEnvVars(v) if v.len() == 5);
        assert_eq!(
            "missing required env vars to use bazel: [BAZEL_PATH BAZEL_OUTPUT_BASE BAZEL_WORKSPACE BAZEL_METRICS_DIR BAZEL_DEPS_FILE]",
            err.to_string()
        );
    }

    #[test]
    fn test_single_char_env_var_is_missing() {
        let config = config_with_env().with_env("BAZEL_PATH", "b");
        assert_matches!(
            BazelPaths::from_config(&config),
            Err(BazelError::MissingEnvVars(v)) if v == vec!["BAZEL_PATH".to_owned()]
        );
    }

    #[test]
    fn test_command_flags() {
        let paths = BazelPaths::from_config(&config_with_env()).unwrap();
        let invocation = create_bazel_command(
            &paths,
            RunName::AqueryBuildRoot,
            &BazelCommand::aquery(),
            &["--output=jsonproto".to_owned()],
        );
        assert_eq!(
            vec![
                "--output_base=/bazel/bazel_output_base",
                "aquery",
                "deps(@soong_injection//mixed_builds:buildroot)",
                "--profile=/bazel/bazel_metrics_dir/aquery-buildroot_bazel_profile.gz",
                "--extra_toolchains=//prebuilts/clang/host/linux-x86:all",
                "--host_platform=//build/bazel/platforms:linux_x86_64",
                "--experimental_repository_disable_download",
                "--ui_event_filters=-INFO",
                "--noshow_progress",
                "--norun_validations",
                "--output=jsonproto",
            ],
            invocation.args
        );
        assert_eq!(PathBuf::from("/out/soong/workspace"), invocation.dir);
        assert!(invocation
            .env
            .contains(&("OUT_DIR".to_owned(), "/out".to_owned())));
        assert!(invocation
            .env
            .contains(&("BAZEL_DO_NOT_DETECT_CPP_TOOLCHAIN".to_owned(), "1".to_owned())));
    }

    #[test]
    fn test_allowlists_by_mode() {
        let allowlists = MixedBuildsAllowlists {
            prod_enabled: vec!["libprod".to_owned()],
            staging_enabled: vec!["libstaging".to_owned()],
            disabled: vec!["libbroken".to_owned()],
        };
        let base = config_with_env().with_mixed_builds_allowlists(allowlists);

        let prod = new_bazel_context(
            &base
                .clone()
                .with_bazel_mode(BazelMode::Prod)
                .with_bazel_modules_force_enabled(["libforced"]),
        )
        .unwrap();
        assert!(prod.bazel_allowlisted("libprod"));
        assert!(prod.bazel_allowlisted("libforced"));
        assert!(!prod.bazel_allowlisted("libstaging"));

        let staging = new_bazel_context(&base.clone().with_bazel_mode(BazelMode::Staging)).unwrap();
        assert!(staging.bazel_allowlisted("libstaging"));
        assert!(!staging.bazel_allowlisted("libother"));

        let dev = new_bazel_context(&base.clone().with_bazel_mode(BazelMode::Dev)).unwrap();
        assert!(dev.bazel_allowlisted("libother"));
        assert!(!dev.bazel_allowlisted("libbroken"));

        let disabled = new_bazel_context(&base.with_bazel_mode(BazelMode::Disabled)).unwrap();
        assert!(!disabled.bazel_allowlisted("libprod"));
        assert!(disabled.build_statements_to_register().is_empty());
    }

    #[test]
    fn test_mock_context() {
        let mock = MockBazelContext {
            output_base: "/bazel/out".to_owned(),
            label_to_output_files: hashmap! {
                "//foo:lib".to_owned() => vec!["bazel-out/foo/lib.so".to_owned()],
            },
            disabled_modules: hashset! {"libbroken".to_owned()},
            ..MockBazelContext::default()
        };
        let config = ConfigKey {
            arch: "arm64".to_owned(),
            os: OsType {
                name: "android".to_owned(),
                device: true,
            },
        };
        mock.queue_bazel_request("//foo:lib", RequestType::GetOutputFiles, config.clone());
        assert_eq!(
            vec![CqueryKey::new("//foo:lib", RequestType::GetOutputFiles, config.clone())],
            mock.queued_requests()
        );
        assert_eq!(
            vec!["bazel-out/foo/lib.so".to_owned()],
            mock.get_output_files("//foo:lib", config.clone()).unwrap()
        );
        assert!(mock.get_output_files("//bar:lib", config).unwrap().is_empty());
        assert!(mock.bazel_allowlisted("libfoo"));
        assert!(!mock.bazel_allowlisted("libbroken"));
    }
}
