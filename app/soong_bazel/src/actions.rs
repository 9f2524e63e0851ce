/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Build actions registered for Bazel's outputs.
//!
//! Every depset becomes a phony target, and every build statement becomes
//! either a shell command, a file write, or a symlink tree.

use std::path::Path;

use crate::aquery::AqueryDepset;
use crate::aquery::BuildStatement;
use crate::context::BazelContext;

const VOLATILE_STATUS_FILE: &str = "bazel-out/volatile-status.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildAction {
    Phony {
        output: String,
        implicits: Vec<String>,
        order_only: Vec<String>,
    },
    Command {
        description: String,
        command: String,
        implicit_outputs: Vec<String>,
        implicits: Vec<String>,
        depfile: Option<String>,
        symlink_outputs: Vec<String>,
    },
    /// `content` is escaped for the writer rule: newlines as `\\n`, `$` as `$$`.
    WriteFile {
        description: String,
        output: String,
        content: String,
    },
    SymlinkTree {
        description: String,
        manifest: String,
        input: String,
        out_dir: String,
    },
}

pub fn bazel_depset_name(content_hash: &str) -> String {
    format!("bazel_depset_{}", content_hash)
}

/// Paths of Bazel outputs relative to its output base.
#[derive(Debug, Clone)]
pub struct BazelOutPaths {
    execution_root: String,
    bazel_out_dir: String,
}

impl BazelOutPaths {
    pub fn new(output_base: &str) -> BazelOutPaths {
        let execution_root = format!("{}/execroot/__main__", output_base.trim_end_matches('/'));
        let bazel_out_dir = format!("{}/bazel-out", execution_root);
        BazelOutPaths {
            execution_root,
            bazel_out_dir,
        }
    }

    pub fn execution_root(&self) -> &str {
        &self.execution_root
    }

    pub fn bazel_out_dir(&self) -> &str {
        &self.bazel_out_dir
    }

    pub fn path_for_bazel_out(&self, path: &str) -> String {
        format!("{}/{}", self.execution_root, path)
    }
}

pub fn depset_phony_action(paths: &BazelOutPaths, depset: &AqueryDepset) -> BuildAction {
    let mut implicits: Vec<String> = depset
        .transitive_dep_set_hashes
        .iter()
        .map(|h| bazel_depset_name(h))
        .collect();
    let mut order_only = Vec::new();
    for artifact in &depset.direct_artifacts {
        let path = paths.path_for_bazel_out(artifact);
        // Workspace status changes on every build.
        if artifact == VOLATILE_STATUS_FILE {
            order_only.push(path);
        } else {
            implicits.push(path);
        }
    }
    BuildAction::Phony {
        output: bazel_depset_name(&depset.content_hash),
        implicits,
        order_only,
    }
}

fn command_action(paths: &BazelOutPaths, statement: &BuildStatement) -> BuildAction {
    let mut words = vec![format!("cd '{}' &&", paths.execution_root())];
    if !statement.output_paths.is_empty() {
        // Outputs may be tree artifacts.
        words.push("rm -rf".to_owned());
        words.extend(statement.output_paths.iter().map(|o| format!("'{}'", o)));
        words.push("&&".to_owned());
    }
    words.extend(
        statement
            .env
            .iter()
            .map(|pair| format!("{}={}", pair.key, pair.value)),
    );
    words.push(statement.command.clone());

    let mut implicits: Vec<String> = statement
        .input_paths
        .iter()
        .map(|p| paths.path_for_bazel_out(p))
        .collect();
    implicits.extend(
        statement
            .input_depset_hashes
            .iter()
            .map(|h| bazel_depset_name(h)),
    );

    if let Some(depfile) = &statement.depfile {
        // Depfile paths are relative to the execution root.
        words.push(format!(
            r#"&& sed -i'' -E 's@(^|\s|")bazel-out/@\1{}/@g' '{}'"#,
            paths.bazel_out_dir(),
            depfile
        ));
    }

    BuildAction::Command {
        description: format!("{}: {:?}", statement.mnemonic, statement.output_paths),
        command: words.join(" "),
        implicit_outputs: statement
            .output_paths
            .iter()
            .map(|o| paths.path_for_bazel_out(o))
            .collect(),
        implicits,
        depfile: statement
            .depfile
            .as_ref()
            .map(|d| paths.path_for_bazel_out(d)),
        symlink_outputs: statement
            .symlink_paths
            .iter()
            .map(|s| paths.path_for_bazel_out(s))
            .collect(),
    }
}

/// Translates one build statement.
///
/// Panics on statements without a command that are neither file writes nor
/// symlink trees, since aquery processing never produces them.
pub fn build_statement_action(paths: &BazelOutPaths, statement: &BuildStatement) -> BuildAction {
    if !statement.command.is_empty() {
        return command_action(paths, statement);
    }
    let first_output = statement.output_paths.first().map(String::as_str);
    match (statement.mnemonic.as_str(), first_output) {
        ("FileWrite" | "SourceSymlinkManifest", Some(output)) => BuildAction::WriteFile {
            description: format!("{} {}", statement.mnemonic, output),
            output: paths.path_for_bazel_out(output),
            content: statement
                .file_contents
                .replace('\n', "\\n")
                .replace('$', "$$"),
        },
        ("SymlinkTree", Some(output)) => {
            let manifest = paths.path_for_bazel_out(output);
            if !manifest.ends_with("MANIFEST") {
                panic!(
                    "the base name of the symlink tree action should be MANIFEST, got {}",
                    manifest
                );
            }
            let out_dir = Path::new(&manifest)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            BuildAction::SymlinkTree {
                description: format!("symlink tree for {}", out_dir),
                input: statement
                    .input_paths
                    .first()
                    .map(|i| paths.path_for_bazel_out(i))
                    .unwrap_or_default(),
                manifest,
                out_dir,
            }
        }
        _ => panic!("unhandled build statement: {:?}", statement),
    }
}

/// All build actions for the results of the last Bazel invocation: phony
/// depsets first, then build statements in their sorted order.
pub fn bazel_build_actions(ctx: &dyn BazelContext) -> Vec<BuildAction> {
    let paths = BazelOutPaths::new(&ctx.output_base());
    let mut actions: Vec<BuildAction> = ctx
        .aquery_depsets()
        .iter()
        .map(|d| depset_phony_action(&paths, d))
        .collect();
    actions.extend(
        ctx.build_statements_to_register()
            .iter()
            .map(|s| build_statement_action(&paths, s)),
    );
    tracing::debug!("Registered {} bazel build actions", actions.len());
    actions
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::aquery::KeyValuePair;

    fn paths() -> BazelOutPaths {
        BazelOutPaths::new("/ob")
    }

    #[test]
    fn test_depset_phony() {
        let depset = AqueryDepset {
            content_hash: "h1".to_owned(),
            direct_artifacts: vec![
                "bazel-out/a.o".to_owned(),
                VOLATILE_STATUS_FILE.to_owned(),
            ],
            transitive_dep_set_hashes: vec!["h0".to_owned()],
        };
        assert_eq!(
            BuildAction::Phony {
                output: "bazel_depset_h1".to_owned(),
                implicits: vec![
                    "bazel_depset_h0".to_owned(),
                    "/ob/execroot/__main__/bazel-out/a.o".to_owned()
                ],
                order_only: vec!["/ob/execroot/__main__/bazel-out/volatile-status.txt".to_owned()],
            },
            depset_phony_action(&paths(), &depset)
        );
    }

    #[test]
    fn test_command_with_depfile() {
        let statement = BuildStatement {
            command: "clang -c foo.c".to_owned(),
            depfile: Some("bazel-out/foo.d".to_owned()),
            output_paths: vec!["bazel-out/foo.o".to_owned()],
            env: vec![KeyValuePair {
                key: "PATH".to_owned(),
                value: "/bin".to_owned(),
            }],
            mnemonic: "CppCompile".to_owned(),
            input_depset_hashes: vec!["h1".to_owned()],
            ..BuildStatement::default()
        };
        assert_matches!(
            build_statement_action(&paths(), &statement),
            BuildAction::Command { command, implicits, depfile, .. } => {
                assert_eq!(
                    "cd '/ob/execroot/__main__' && rm -rf 'bazel-out/foo.o' && PATH=/bin clang -c foo.c \
                     && sed -i'' -E 's@(^|\\s|\")bazel-out/@\\1/ob/execroot/__main__/bazel-out/@g' 'bazel-out/foo.d'",
                    command
                );
                assert_eq!(vec!["bazel_depset_h1".to_owned()], implicits);
                assert_eq!(Some("/ob/execroot/__main__/bazel-out/foo.d".to_owned()), depfile);
            }
        );
    }

    #[test]
    fn test_file_write_escaping() {
        let statement = BuildStatement {
            output_paths: vec!["bazel-out/x.txt".to_owned()],
            mnemonic: "FileWrite".to_owned(),
            file_contents: "a\n$b".to_owned(),
            ..BuildStatement::default()
        };
        assert_matches!(
            build_statement_action(&paths(), &statement),
            BuildAction::WriteFile { content, .. } if content == "a\\n$$b"
        );
    }

    #[test]
    #[should_panic(expected = "the base name of the symlink tree action should be MANIFEST")]
    fn test_symlink_tree_requires_manifest() {
        let statement = BuildStatement {
            output_paths: vec!["bazel-out/runfiles/OTHER".to_owned()],
            input_paths: vec!["bazel-out/in".to_owned()],
            mnemonic: "SymlinkTree".to_owned(),
            ..BuildStatement::default()
        };
        build_statement_action(&paths(), &statement);
    }

    #[test]
    #[should_panic(expected = "unhandled build statement")]
    fn test_unhandled_statement() {
        let statement = BuildStatement {
            output_paths: vec!["bazel-out/x".to_owned()],
            mnemonic: "Mystery".to_owned(),
            ..BuildStatement::default()
        };
        build_statement_action(&paths(), &statement);
    }
}
