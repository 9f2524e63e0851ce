/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use dupe::Dupe;
use soong_bazel::actions::bazel_build_actions;
use soong_bazel::actions::BuildAction;
use soong_bazel::context::new_bazel_context;
use soong_bazel::context::BazelContext;
use soong_core::config::BuildConfig;

use crate::graph::ModuleGraph;
use crate::mixed_builds;
use crate::mixed_builds::MixedBuildsInfo;
use crate::module::Module;
use crate::module::ModuleId;
use crate::mutator::MutatorRegistry;

/// One analysis of the module graph.
///
/// Owns everything that lives as long as the build invocation: the
/// configuration (inside the graph), the registered mutators and the Bazel
/// context used by mixed builds.
pub struct BuildSession {
    graph: ModuleGraph,
    registry: MutatorRegistry,
    bazel_context: Arc<dyn BazelContext>,
}

impl BuildSession {
    /// A session with the standard mutators and the Bazel context matching
    /// the configured bazel mode.
    pub fn new(config: BuildConfig) -> anyhow::Result<BuildSession> {
        let bazel_context = new_bazel_context(&config).context("Error creating bazel context")?;
        Ok(BuildSession::with_bazel_context(config, bazel_context))
    }

    pub fn with_bazel_context(
        config: BuildConfig,
        bazel_context: Arc<dyn BazelContext>,
    ) -> BuildSession {
        BuildSession {
            graph: ModuleGraph::new(config).with_bazel_context(bazel_context.dupe()),
            registry: MutatorRegistry::with_standard_mutators(),
            bazel_context,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        self.graph.config()
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn registry_mut(&mut self) -> &mut MutatorRegistry {
        &mut self.registry
    }

    pub fn add_module(&mut self, module: Box<dyn Module>) -> anyhow::Result<ModuleId> {
        self.graph.add_module(module)
    }

    /// Runs every mutator, then Bazel for the modules that queued requests.
    pub fn analyze(&mut self) -> anyhow::Result<()> {
        let start = Instant::now();
        self.graph.run_mutators(&self.registry)?;
        if self.config().is_mixed_builds_enabled() {
            self.bazel_context
                .invoke_bazel(self.graph.config())
                .context("Error invoking bazel")?;
            mixed_builds::process_bazel_query_responses(&self.graph)?;
        }
        tracing::info!(
            "Analyzed {} modules ({} variants) in {:?}",
            self.graph.module_names().len(),
            self.graph.all_variants().len(),
            start.elapsed()
        );
        Ok(())
    }

    pub fn mixed_builds_info(&self) -> MixedBuildsInfo {
        mixed_builds::mixed_builds_info(&self.graph)
    }

    /// Actions for Bazel's outputs after [`BuildSession::analyze`]. Empty
    /// unless mixed builds are enabled.
    pub fn bazel_build_actions(&self) -> Vec<BuildAction> {
        if !self.config().is_mixed_builds_enabled() {
            return Vec::new();
        }
        bazel_build_actions(self.bazel_context.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::io::Seek;
    use std::io::SeekFrom;

    use assert_matches::assert_matches;
    use maplit::btreeset;
    use maplit::hashmap;
    use maplit::hashset;
    use soong_bazel::aquery::AqueryDepset;
    use soong_bazel::aquery::BuildStatement;
    use soong_bazel::context::MockBazelContext;
    use soong_bazel::cquery::CqueryKey;
    use soong_bazel::cquery::RequestType;
    use soong_core::config::BazelMode;
    use soong_core::logging::subscriber_for_writer;
    use tracing_subscriber::EnvFilter;

    use super::*;
    use crate::mixed_builds::config_key;
    use crate::module::ArchType;
    use crate::module::Os;
    use crate::testing::test_config;
    use crate::testing::variant;
    use crate::testing::TestModule;

    fn mock_bazel() -> Arc<MockBazelContext> {
        Arc::new(MockBazelContext {
            label_to_output_files: hashmap! {
                "//foo:lib".to_owned() => vec!["bazel-out/foo/libfoo.so".to_owned()],
            },
            disabled_modules: hashset! {"libbroken".to_owned()},
            output_base: "/ob".to_owned(),
            depsets: vec![AqueryDepset {
                content_hash: "h1".to_owned(),
                direct_artifacts: vec!["src/foo.c".to_owned()],
                transitive_dep_set_hashes: Vec::new(),
            }],
            build_statements: vec![BuildStatement {
                command: "clang -c src/foo.c".to_owned(),
                output_paths: vec!["bazel-out/foo/libfoo.so".to_owned()],
                input_depset_hashes: vec!["h1".to_owned()],
                mnemonic: "CppLink".to_owned(),
                ..BuildStatement::default()
            }],
            ..MockBazelContext::default()
        })
    }

    fn session(config: BuildConfig, bazel: Arc<MockBazelContext>) -> BuildSession {
        let mut session = BuildSession::with_bazel_context(config, bazel);
        for module in [
            TestModule::new("libfoo").bazel("//foo:lib"),
            TestModule::new("libbroken").bazel("//broken:lib"),
            TestModule::new("libplain"),
        ] {
            session.add_module(Box::new(module)).unwrap();
        }
        session
    }

    fn bazel_outputs(session: &BuildSession, name: &str) -> Vec<String> {
        let id = variant(session.graph(), name, &[]);
        session.graph().with_module(id, |m| {
            m.as_any()
                .downcast_ref::<TestModule>()
                .unwrap()
                .bazel_outputs
                .clone()
        })
    }

    #[test]
    fn test_mixed_build() {
        let bazel = mock_bazel();
        let mut session = session(
            test_config().with_bazel_mode(BazelMode::Dev),
            bazel.dupe(),
        );
        session.analyze().unwrap();

        assert_eq!(
            vec![CqueryKey::new(
                "//foo:lib",
                RequestType::GetOutputFiles,
                config_key(ArchType::Common, Os::Android)
            )],
            bazel.queued_requests()
        );
        assert_eq!(
            vec!["bazel-out/foo/libfoo.so".to_owned()],
            bazel_outputs(&session, "libfoo")
        );
        assert!(bazel_outputs(&session, "libbroken").is_empty());

        let info = session.mixed_builds_info();
        assert_eq!(btreeset! {"libfoo".to_owned()}, info.enabled_modules);
        assert_eq!(btreeset! {"libbroken".to_owned()}, info.disabled_modules);

        let actions = session.bazel_build_actions();
        assert_eq!(2, actions.len());
        assert_matches!(
            &actions[0],
            BuildAction::Phony { output, .. } if output == "bazel_depset_h1"
        );
        assert_matches!(
            &actions[1],
            BuildAction::Command { implicits, .. } if implicits == &vec!["bazel_depset_h1".to_owned()]
        );
    }

    #[test]
    fn test_mixed_builds_disabled() {
        let bazel = mock_bazel();
        let mut session = session(test_config(), bazel.dupe());
        session.analyze().unwrap();

        assert!(bazel.queued_requests().is_empty());
        assert!(bazel_outputs(&session, "libfoo").is_empty());
        assert!(session.bazel_build_actions().is_empty());
        let info = session.mixed_builds_info();
        assert!(info.enabled_modules.is_empty());
        assert_eq!(
            btreeset! {"libbroken".to_owned(), "libfoo".to_owned()},
            info.disabled_modules
        );
    }

    #[test]
    fn test_analysis_is_logged() {
        let log = Arc::new(tempfile::tempfile().unwrap());
        let subscriber = subscriber_for_writer(log.dupe(), EnvFilter::new("soong_android=info"));
        let mut session = session(test_config(), mock_bazel());
        tracing::subscriber::with_default(subscriber, || session.analyze()).unwrap();

        let mut contents = String::new();
        let mut file: &std::fs::File = &log;
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_string(&mut contents).unwrap();
        assert!(contents.contains("Analyzed 3 modules"), "{}", contents);
        assert!(!contents.contains("DEBUG"));
    }
}
