/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Conversion of Bazel's action graph (the JSON form of an `aquery` response)
//! into build statements that can be registered alongside natively analysed
//! modules.
//!
//! Bazel identifies artifacts, depsets and path fragments with integer ids that
//! are not stable between invocations. Everything emitted here is keyed by
//! content instead, and sorted, so the output is deterministic.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use base64::Engine;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use soong_core::shell::shell_escape_including_spaces;
use soong_core::shell::shell_join;
use soong_core::shell::QuoteError;

/// Placed in depsets that are otherwise empty.
pub const BAZEL_TOOLS_DEPENDENCY_SENTINEL: &str = "BAZEL_TOOLS_DEPENDENCY_SENTINEL";

const PY3_WRAPPER_FILE_NAME: &str = "/py3wrapper.sh";

/// Template tokens whose value is forced regardless of what aquery reports.
const TEMPLATE_OVERRIDDEN_TOKENS: &[(&str, &str)] = &[("%python_binary%", "python3")];

#[derive(Debug, thiserror::Error)]
pub enum AqueryError {
    #[error("undefined path fragment id {0}")]
    UndefinedPathFragment(u32),
    #[error("fragment cannot refer to itself as parent {0}")]
    SelfParentFragment(String),
    #[error("undefined input artifactId {0}")]
    UndefinedArtifact(u32),
    #[error("undefined input depsetId {child} (referenced by depsetId {parent})")]
    UndefinedChildDepset { child: u32, parent: u32 },
    #[error("undefined input depsetId {0}")]
    UndefinedDepset(u32),
    #[error("undefined input depset hash {0}")]
    UndefinedDepsetHash(String),
    #[error("undefined outputId {0}")]
    UndefinedOutput(u32),
    #[error("found multiple potential depfiles {0:?}, {1:?}")]
    MultipleDepfiles(String, String),
    #[error("received action with no command: [{0}]")]
    NoCommand(String),
    #[error("Expect 1 input and 1 output to symlink action, got: input {inputs:?}, output {outputs:?}")]
    SymlinkArity {
        inputs: Vec<String>,
        outputs: Vec<String>,
    },
    #[error("Expect 1 output to template expand action, got: output {0:?}")]
    TemplateExpandArity(Vec<String>),
    #[error("two different depsets have the same hash: {0:?}, {1:?}")]
    HashCollision(Box<AqueryDepset>, Box<AqueryDepset>),
    #[error("cannot quote command argument: {0}")]
    Quote(#[from] QuoteError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Artifact {
    id: u32,
    path_fragment_id: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PathFragment {
    id: u32,
    label: String,
    parent_id: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DepSetOfFiles {
    id: u32,
    direct_artifact_ids: Vec<u32>,
    transitive_dep_set_ids: Vec<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Action {
    arguments: Vec<String>,
    environment_variables: Vec<KeyValuePair>,
    input_dep_set_ids: Vec<u32>,
    mnemonic: String,
    output_ids: Vec<u32>,
    template_content: String,
    substitutions: Vec<KeyValuePair>,
    file_contents: String,
}

impl Action {
    fn is_symlink(&self) -> bool {
        matches!(
            self.mnemonic.as_str(),
            "Symlink" | "SolibSymlink" | "ExecutableSymlink"
        )
    }

    fn is_template_expand(&self) -> bool {
        self.mnemonic == "TemplateExpand"
    }

    fn is_file_write(&self) -> bool {
        matches!(self.mnemonic.as_str(), "FileWrite" | "SourceSymlinkManifest")
    }

    fn is_symlink_tree(&self) -> bool {
        self.mnemonic == "SymlinkTree"
    }

    fn should_skip(&self) -> bool {
        // Middleman inputs are folded into the depsets that reference them.
        matches!(
            self.mnemonic.as_str(),
            "Middleman" | "PythonZipper" | "Fail" | "BaselineCoverage"
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ActionGraphContainer {
    artifacts: Vec<Artifact>,
    actions: Vec<Action>,
    dep_set_of_files: Vec<DepSetOfFiles>,
    path_fragments: Vec<PathFragment>,
}

/// A depset from the aquery response, with artifacts expanded to paths and
/// identified by a hash of its contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AqueryDepset {
    pub content_hash: String,
    pub direct_artifacts: Vec<String>,
    pub transitive_dep_set_hashes: Vec<String>,
}

/// One Bazel action, ready to be registered as a build action.
///
/// Inputs are either unexpanded depsets or raw paths, never both for the same
/// input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStatement {
    pub command: String,
    pub depfile: Option<String>,
    pub output_paths: Vec<String>,
    pub symlink_paths: Vec<String>,
    pub env: Vec<KeyValuePair>,
    pub mnemonic: String,
    pub input_depset_hashes: Vec<String>,
    pub input_paths: Vec<String>,
    pub file_contents: String,
}

/// Content hash of a depset: SHA-256 over the newline-joined direct paths
/// followed by the concatenated child hashes, URL-safe base64 without padding.
pub fn depset_content_hash(direct_paths: &[String], transitive_hashes: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(direct_paths.join("\n").as_bytes());
    hasher.update(transitive_hashes.concat().as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn expand_path_fragment(
    id: u32,
    fragments: &HashMap<u32, &PathFragment>,
) -> Result<String, AqueryError> {
    let mut labels = Vec::new();
    let mut current = id;
    // Zero terminates the chain.
    while current > 0 {
        let fragment = fragments
            .get(&current)
            .ok_or(AqueryError::UndefinedPathFragment(current))?;
        labels.push(fragment.label.as_str());
        if fragment.parent_id == current {
            return Err(AqueryError::SelfParentFragment(format!("{:?}", fragment)));
        }
        current = fragment.parent_id;
    }
    Ok(labels
        .into_iter()
        .rev()
        .filter(|l| !l.is_empty())
        .join("/"))
}

fn parent_dir(path: &str) -> String {
    match Path::new(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
        _ => ".".to_owned(),
    }
}

/// Replaces every key with its value in a single left to right pass. Earlier
/// pairs win when several keys match at the same position.
fn replace_all(text: &str, pairs: &[(String, String)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'outer: while let Some(c) = rest.chars().next() {
        for (key, value) in pairs {
            if !key.is_empty() && rest.starts_with(key.as_str()) {
                out.push_str(value);
                rest = &rest[key.len()..];
                continue 'outer;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn expand_template_content(action: &Action) -> String {
    let pairs = action
        .substitutions
        .iter()
        .map(|pair| {
            let value = TEMPLATE_OVERRIDDEN_TOKENS
                .iter()
                .find(|(token, _)| *token == pair.key)
                .map_or_else(|| pair.value.clone(), |(_, v)| (*v).to_owned());
            (pair.key.clone(), value)
        })
        .collect::<Vec<_>>();
    replace_all(&action.template_content, &pairs)
}

/// Escapes `s` for use inside double quotes of a single-quoted `bash -c`
/// argument.
fn escape_command_line_argument(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '$' => out.push_str("\\$"),
            '`' => out.push_str("\\`"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\'' => out.push_str("'\"'\"'"),
            c => out.push(c),
        }
    }
    out
}

struct AqueryArtifactHandler {
    /// Set when some depset only contains the sentinel.
    sentinel_needed: bool,
    depset_id_to_aquery_depset: BTreeMap<u32, AqueryDepset>,
    depset_hash_to_aquery_depset: HashMap<String, AqueryDepset>,
    depset_hash_to_artifact_paths_cache: HashMap<String, Vec<String>>,
    artifact_id_to_path: HashMap<u32, String>,
}

impl AqueryArtifactHandler {
    fn new(container: &ActionGraphContainer) -> anyhow::Result<AqueryArtifactHandler> {
        let fragments: HashMap<u32, &PathFragment> =
            container.path_fragments.iter().map(|f| (f.id, f)).collect();

        let mut artifact_id_to_path = HashMap::new();
        for artifact in &container.artifacts {
            let path = expand_path_fragment(artifact.path_fragment_id, &fragments)?;
            artifact_id_to_path.insert(artifact.id, path);
        }

        // Any action consuming a middleman output consumes the middleman's
        // inputs instead.
        let mut middleman_id_to_depset_ids: HashMap<u32, Vec<u32>> = HashMap::new();
        for action in &container.actions {
            if action.mnemonic == "Middleman" {
                for output_id in &action.output_ids {
                    middleman_id_to_depset_ids.insert(*output_id, action.input_dep_set_ids.clone());
                }
            }
        }

        let depsets_by_id: HashMap<u32, &DepSetOfFiles> = container
            .dep_set_of_files
            .iter()
            .map(|d| (d.id, d))
            .collect();

        let mut handler = AqueryArtifactHandler {
            sentinel_needed: false,
            depset_id_to_aquery_depset: BTreeMap::new(),
            depset_hash_to_aquery_depset: HashMap::new(),
            depset_hash_to_artifact_paths_cache: HashMap::new(),
            artifact_id_to_path,
        };
        for depset in &container.dep_set_of_files {
            handler.populate_depset_maps(depset, &middleman_id_to_depset_ids, &depsets_by_id)?;
        }
        Ok(handler)
    }

    fn populate_depset_maps(
        &mut self,
        depset: &DepSetOfFiles,
        middleman_id_to_depset_ids: &HashMap<u32, Vec<u32>>,
        depsets_by_id: &HashMap<u32, &DepSetOfFiles>,
    ) -> Result<AqueryDepset, AqueryError> {
        if let Some(existing) = self.depset_id_to_aquery_depset.get(&depset.id) {
            return Ok(existing.clone());
        }

        let mut transitive_ids = depset.transitive_dep_set_ids.clone();
        let mut direct_paths = Vec::new();
        for artifact_id in &depset.direct_artifact_ids {
            let path = self
                .artifact_id_to_path
                .get(artifact_id)
                .ok_or(AqueryError::UndefinedArtifact(*artifact_id))?;
            if let Some(substitute) = middleman_id_to_depset_ids.get(artifact_id) {
                transitive_ids.extend(substitute.iter().copied());
            } else if path.ends_with(PY3_WRAPPER_FILE_NAME) || path.starts_with("../bazel_tools") {
                // Dropped: the wrapper is replaced by the python3 binary, and
                // bazel_tools files carry timestamps in the future.
            } else {
                direct_paths.push(path.clone());
            }
        }

        let mut child_hashes = Vec::with_capacity(transitive_ids.len());
        for child_id in transitive_ids {
            let child = depsets_by_id
                .get(&child_id)
                .ok_or(AqueryError::UndefinedChildDepset {
                    child: child_id,
                    parent: depset.id,
                })?;
            let child = self.populate_depset_maps(child, middleman_id_to_depset_ids, depsets_by_id)?;
            child_hashes.push(child.content_hash);
        }

        if direct_paths.is_empty() && child_hashes.is_empty() {
            direct_paths.push(BAZEL_TOOLS_DEPENDENCY_SENTINEL.to_owned());
            self.sentinel_needed = true;
        }

        let aquery_depset = AqueryDepset {
            content_hash: depset_content_hash(&direct_paths, &child_hashes),
            direct_artifacts: direct_paths,
            transitive_dep_set_hashes: child_hashes,
        };
        self.depset_id_to_aquery_depset
            .insert(depset.id, aquery_depset.clone());
        self.depset_hash_to_aquery_depset
            .insert(aquery_depset.content_hash.clone(), aquery_depset.clone());
        Ok(aquery_depset)
    }

    /// Flattens the given depsets. Only used for actions that need their
    /// inputs spelled out.
    fn input_paths(&mut self, depset_ids: &[u32]) -> Result<Vec<String>, AqueryError> {
        let mut paths = Vec::new();
        for id in depset_ids {
            let hash = self
                .depset_id_to_aquery_depset
                .get(id)
                .map(|d| d.content_hash.clone())
                .ok_or(AqueryError::UndefinedDepset(*id))?;
            paths.extend(self.artifact_paths_from_depset_hash(&hash)?);
        }
        Ok(paths)
    }

    fn artifact_paths_from_depset_hash(&mut self, hash: &str) -> Result<Vec<String>, AqueryError> {
        if let Some(cached) = self.depset_hash_to_artifact_paths_cache.get(hash) {
            return Ok(cached.clone());
        }
        let depset = self
            .depset_hash_to_aquery_depset
            .get(hash)
            .cloned()
            .ok_or_else(|| AqueryError::UndefinedDepsetHash(hash.to_owned()))?;
        let mut result = depset.direct_artifacts;
        for child in &depset.transitive_dep_set_hashes {
            result.extend(self.artifact_paths_from_depset_hash(child)?);
        }
        self.depset_hash_to_artifact_paths_cache
            .insert(hash.to_owned(), result.clone());
        Ok(result)
    }

    fn depset_content_hashes(&self, depset_ids: &[u32]) -> Result<Vec<String>, AqueryError> {
        depset_ids
            .iter()
            .map(|id| {
                self.depset_id_to_aquery_depset
                    .get(id)
                    .map(|d| d.content_hash.clone())
                    .ok_or(AqueryError::UndefinedDepset(*id))
            })
            .collect()
    }

    /// Output paths of `action`, with the `.d` output split off as depfile.
    fn output_paths(&self, action: &Action) -> Result<(Vec<String>, Option<String>), AqueryError> {
        let mut outputs = Vec::new();
        let mut depfile: Option<String> = None;
        for id in &action.output_ids {
            let path = self
                .artifact_id_to_path
                .get(id)
                .ok_or(AqueryError::UndefinedOutput(*id))?;
            if Path::new(path).extension().is_some_and(|e| e == "d") {
                if let Some(previous) = depfile {
                    return Err(AqueryError::MultipleDepfiles(previous, path.clone()));
                }
                depfile = Some(path.clone());
            } else {
                outputs.push(path.clone());
            }
        }
        Ok((outputs, depfile))
    }

    fn normal_action(&self, action: &Action) -> Result<BuildStatement, AqueryError> {
        let command = shell_join(action.arguments.iter().map(String::as_str))?;
        let input_depset_hashes = self.depset_content_hashes(&action.input_dep_set_ids)?;
        let (output_paths, depfile) = self.output_paths(action)?;
        Ok(BuildStatement {
            command,
            depfile,
            output_paths,
            input_depset_hashes,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            ..BuildStatement::default()
        })
    }

    fn template_expand_action(&self, action: &Action) -> Result<BuildStatement, AqueryError> {
        let (output_paths, depfile) = self.output_paths(action)?;
        if output_paths.len() != 1 {
            return Err(AqueryError::TemplateExpandArity(output_paths));
        }
        // Newlines travel as `\\n` and are restored by sed when writing the file.
        let command = format!(
            r#"/bin/bash -c 'echo "{0}" | sed "s/\\\\n/\\n/g" > {1} && chmod a+x {1}'"#,
            escape_command_line_argument(&expand_template_content(action)),
            output_paths[0]
        );
        let input_depset_hashes = self.depset_content_hashes(&action.input_dep_set_ids)?;
        Ok(BuildStatement {
            command,
            depfile,
            output_paths,
            input_depset_hashes,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            ..BuildStatement::default()
        })
    }

    fn file_write_action(&self, action: &Action) -> Result<BuildStatement, AqueryError> {
        let (output_paths, _) = self.output_paths(action)?;
        let input_depset_hashes = self.depset_content_hashes(&action.input_dep_set_ids)?;
        Ok(BuildStatement {
            output_paths,
            input_depset_hashes,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            file_contents: action.file_contents.clone(),
            ..BuildStatement::default()
        })
    }

    fn symlink_tree_action(&mut self, action: &Action) -> Result<BuildStatement, AqueryError> {
        let (output_paths, _) = self.output_paths(action)?;
        let input_paths = self.input_paths(&action.input_dep_set_ids)?;
        if input_paths.len() != 1 || output_paths.len() != 1 {
            return Err(AqueryError::SymlinkArity {
                inputs: input_paths,
                outputs: output_paths,
            });
        }
        Ok(BuildStatement {
            output_paths,
            input_paths,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            ..BuildStatement::default()
        })
    }

    fn symlink_action(&mut self, action: &Action) -> Result<BuildStatement, AqueryError> {
        let (output_paths, depfile) = self.output_paths(action)?;
        let input_paths = self.input_paths(&action.input_dep_set_ids)?;
        if input_paths.len() != 1 || output_paths.len() != 1 {
            return Err(AqueryError::SymlinkArity {
                inputs: input_paths,
                outputs: output_paths,
            });
        }
        let out = &output_paths[0];
        let out_dir = shell_escape_including_spaces(&parent_dir(out))?.into_owned();
        let escaped_out = shell_escape_including_spaces(out)?;
        // Absolute, as some consumers mishandle relative symlinks.
        let input = format!("$PWD/{}", shell_escape_including_spaces(&input_paths[0])?);
        let command = format!(
            "mkdir -p {} && rm -f {} && ln -sf {} {}",
            out_dir, escaped_out, input, escaped_out
        );
        Ok(BuildStatement {
            command,
            depfile,
            symlink_paths: output_paths.clone(),
            output_paths,
            input_paths,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            ..BuildStatement::default()
        })
    }
}

/// Parses an aquery response and returns its build statements and depsets,
/// both sorted deterministically.
pub fn aquery_build_statements(
    aquery_json: &[u8],
) -> anyhow::Result<(Vec<BuildStatement>, Vec<AqueryDepset>)> {
    let container: ActionGraphContainer =
        serde_json::from_slice(aquery_json).context("Error parsing aquery output")?;
    let mut handler = AqueryArtifactHandler::new(&container)?;

    let mut statements = Vec::new();
    if handler.sentinel_needed {
        statements.push(BuildStatement {
            command: format!("touch '{}'", BAZEL_TOOLS_DEPENDENCY_SENTINEL),
            output_paths: vec![BAZEL_TOOLS_DEPENDENCY_SENTINEL.to_owned()],
            mnemonic: BAZEL_TOOLS_DEPENDENCY_SENTINEL.to_owned(),
            ..BuildStatement::default()
        });
    }

    for action in &container.actions {
        if action.should_skip() {
            continue;
        }
        let statement = if action.is_symlink() {
            handler.symlink_action(action)?
        } else if action.is_template_expand() && action.arguments.is_empty() {
            handler.template_expand_action(action)?
        } else if action.is_file_write() {
            handler.file_write_action(action)?
        } else if action.is_symlink_tree() {
            handler.symlink_tree_action(action)?
        } else if action.arguments.is_empty() {
            return Err(AqueryError::NoCommand(action.mnemonic.clone()).into());
        } else {
            handler.normal_action(action)?
        };
        statements.push(statement);
    }

    let mut depsets_by_hash: HashMap<&str, &AqueryDepset> = HashMap::new();
    let mut depsets = Vec::new();
    for depset in handler.depset_id_to_aquery_depset.values() {
        match depsets_by_hash.get(depset.content_hash.as_str()) {
            Some(previous) => {
                if *previous != depset {
                    return Err(AqueryError::HashCollision(
                        Box::new((*previous).clone()),
                        Box::new(depset.clone()),
                    )
                    .into());
                }
            }
            None => {
                depsets_by_hash.insert(&depset.content_hash, depset);
                depsets.push(depset.clone());
            }
        }
    }

    // Each output has a single generating action, so outputs give a total order.
    statements.sort_by(|a, b| {
        a.output_paths
            .len()
            .cmp(&b.output_paths.len())
            .then_with(|| match (a.output_paths.first(), b.output_paths.first()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => a.command.cmp(&b.command),
            })
    });
    depsets.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));

    tracing::debug!(
        "aquery produced {} build statements and {} depsets",
        statements.len(),
        depsets.len()
    );
    Ok((statements, depsets))
}
