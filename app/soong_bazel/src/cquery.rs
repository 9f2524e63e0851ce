/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Cquery request keys and the files injected into the Bazel workspace to
//! answer them.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt;

use dupe::Dupe;
use itertools::Itertools;

/// The kinds of information that can be requested for a label.
///
/// Names must be unique and alphanumeric since they are used as Starlark
/// identifiers.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestType {
    GetOutputFiles,
    GetPythonBinary,
}

impl RequestType {
    pub fn name(self) -> &'static str {
        match self {
            RequestType::GetOutputFiles => "getOutputFiles",
            RequestType::GetPythonBinary => "getPythonBinary",
        }
    }

    /// Body of the Starlark function `(target, id_string) -> str` answering
    /// this request.
    pub fn starlark_function_body(self) -> &'static str {
        match self {
            RequestType::GetOutputFiles => {
                "return ', '.join([f.path for f in target.files.to_list()])"
            }
            RequestType::GetPythonBinary => {
                "return providers(target)[\"FilesToRunProvider\"].executable.path"
            }
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn parse_output_files(raw: &str) -> Vec<String> {
    raw.split(", ")
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn parse_python_binary(raw: &str) -> String {
    raw.to_owned()
}

/// The operating system part of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OsType {
    pub name: String,
    pub device: bool,
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Configuration a label is requested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{}::{}", arch, os)]
pub struct ConfigKey {
    pub arch: String,
    pub os: OsType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("cquery({},{},{})", label, request, config)]
pub struct CqueryKey {
    pub label: String,
    pub request: RequestType,
    pub config: ConfigKey,
}

impl CqueryKey {
    /// Labels of the main repository are normalized to name it explicitly.
    pub fn new(label: &str, request: RequestType, config: ConfigKey) -> CqueryKey {
        let label = if label.starts_with("//") {
            format!("@{}", label)
        } else {
            label.to_owned()
        };
        CqueryKey {
            label,
            request,
            config,
        }
    }

    /// `arch|os` as known to the platforms in the Bazel workspace.
    pub fn config_string(&self) -> String {
        let arch = match self.config.arch.as_str() {
            // Generic device targets map to `android_target`, hosts to x86_64.
            "" | "common" if self.config.os.device => "target",
            "" | "common" => "x86_64",
            arch => arch,
        };
        let os = match self.config.os.name.as_str() {
            "" | "common_os" | "linux_glibc" => "linux",
            os => os,
        };
        format!("{}|{}", arch, os)
    }

    /// The id the cquery output reports results under.
    pub fn cquery_id(&self) -> String {
        format!("{}|{}", self.label, self.config_string())
    }
}

/// Splits cquery output lines of the form `id>>result`.
pub fn parse_cquery_output(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once(">>"))
        .map(|(id, result)| (id.to_owned(), result.to_owned()))
        .collect()
}

pub const BUILDROOT_LABEL: &str = "@soong_injection//mixed_builds:buildroot";
pub const PHONYROOT_LABEL: &str = "@soong_injection//mixed_builds:phonyroot";

pub const MAIN_BZL_FILE_CONTENTS: &str = r#"
#####################################################
# This file is generated by soong_build. Do not edit.
#####################################################

def _config_node_transition_impl(settings, attr):
    return {
        "//command_line_option:platforms": "@//build/bazel/platforms:%s_%s" % (attr.os, attr.arch),
    }

_config_node_transition = transition(
    implementation = _config_node_transition_impl,
    inputs = [],
    outputs = [
        "//command_line_option:platforms",
    ],
)

def _passthrough_rule_impl(ctx):
    return [DefaultInfo(files = depset(ctx.files.deps))]

config_node = rule(
    implementation = _passthrough_rule_impl,
    attrs = {
        "arch" : attr.string(mandatory = True),
        "os"   : attr.string(mandatory = True),
        "deps" : attr.label_list(cfg = _config_node_transition, allow_files = True),
        "_allowlist_function_transition": attr.label(default = "@bazel_tools//tools/allowlists/function_transition_allowlist"),
    },
)

# Depends on every requested target, building it builds the whole tree.
mixed_build_root = rule(
    implementation = _passthrough_rule_impl,
    attrs = {
        "deps" : attr.label_list(),
    },
)

def _phony_root_impl(ctx):
    return []

# Depends on other targets but builds nothing. Building it creates the symlink
# forests of all dependencies without running their actions.
phony_root = rule(
    implementation = _phony_root_impl,
    attrs = {"deps" : attr.label_list()},
)
"#;

/// `mixed_builds/BUILD.bazel`: one `config_node` per configuration, grouping
/// the labels requested in it.
pub fn main_build_file_contents<'a>(requests: impl IntoIterator<Item = &'a CqueryKey>) -> String {
    let mut labels_by_config: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for key in requests {
        labels_by_config
            .entry(key.config_string())
            .or_default()
            .insert(format!("{:?}", key.label));
    }

    let mut config_nodes = String::new();
    let mut all_labels = Vec::new();
    for (config, labels) in &labels_by_config {
        let (arch, os) = config.split_once('|').unwrap_or((config.as_str(), ""));
        let target = format!("{}_{}", os, arch);
        all_labels.push(format!("\":{}\"", target));
        config_nodes.push_str(&format!(
            "\nconfig_node(name = \"{}\",\n    arch = \"{}\",\n    os = \"{}\",\n    deps = [{}],\n)\n",
            target,
            arch,
            os,
            labels.iter().join(",\n            ")
        ));
    }

    format!(
        "\n# This file is generated by soong_build. Do not edit.\n\
         load(\":main.bzl\", \"config_node\", \"mixed_build_root\", \"phony_root\")\n\
         \n{}\n\
         \nmixed_build_root(name = \"buildroot\",\n    deps = [{}],\n)\n\
         \nphony_root(name = \"phonyroot\",\n    deps = [\":buildroot\"],\n)\n",
        config_nodes,
        all_labels.join(",\n            ")
    )
}

fn indent(original: &str) -> String {
    original
        .split('\n')
        .map(|line| format!("  {}\n", line))
        .collect()
}

const CQUERY_STARLARK_PRELUDE: &str = r#"
# This file is generated by soong_build. Do not edit.

# json.encode() is not available in the cquery environment.
def json_encode(input):
  # Dicts may not contain dicts, lists may only contain primitives.
  def encode_primitive(p):
    t = type(p)
    if t == "string" or t == "int":
      return repr(p)
    fail("unsupported value '%s' of type '%s'" % (p, type(p)))

  def encode_list(list):
    return "[%s]" % ", ".join([encode_primitive(item) for item in list])

  def encode_list_or_primitive(v):
    return encode_list(v) if type(v) == "list" else encode_primitive(v)

  if type(input) == "dict":
    kv_pairs = [("%s: %s" % (encode_primitive(k), encode_list_or_primitive(v))) for (k, v) in input.items()]
    return "{ %s }" % ", ".join(kv_pairs)
  else:
    return encode_list_or_primitive(input)
"#;

const CQUERY_STARLARK_GET_ARCH: &str = r#"
def get_arch(target):
  buildoptions = build_options(target)
  if buildoptions == None:
    # File targets have no build options and are treated as host files.
    return "x86_64|linux"
  platforms = build_options(target)["//command_line_option:platforms"]
  if len(platforms) != 1:
    fail("expected exactly 1 platform for " + str(target.label) + " but got " + str(platforms))
  platform_name = build_options(target)["//command_line_option:platforms"][0].name
  if platform_name == "host":
    return "HOST"
  elif platform_name.startswith("android_"):
    return platform_name[len("android_"):] + "|" + platform_name[:len("android_")-1]
  elif platform_name.startswith("linux_"):
    return platform_name[len("linux_"):] + "|" + platform_name[:len("linux_")-1]
  else:
    fail("expected platform name of the form 'android_<arch>' or 'linux_<arch>', but was " + str(platforms))
    return "UNKNOWN"
"#;

/// `buildroot.cquery`: maps each requested id to the function answering its
/// request type. Ids that were not requested report `NONE`.
pub fn cquery_starlark_file_contents<'a>(
    requests: impl IntoIterator<Item = &'a CqueryKey>,
) -> String {
    let mut ids_by_request: BTreeMap<RequestType, BTreeSet<String>> = BTreeMap::new();
    for key in requests {
        ids_by_request
            .entry(key.request)
            .or_default()
            .insert(format!("{:?} : True", key.cquery_id()));
    }

    let mut label_maps = String::new();
    let mut functions = String::new();
    let mut switch = String::new();
    for (request, ids) in &ids_by_request {
        let map_name = format!("{}_Labels", request.name());
        let function_name = format!("{}_Fn", request.name());
        label_maps.push_str(&format!(
            "\n{} = {{\n  {}\n}}\n",
            map_name,
            ids.iter().join(",\n  ")
        ));
        functions.push_str(&format!(
            "\ndef {}(target, id_string):\n{}\n",
            function_name,
            indent(request.starlark_function_body())
        ));
        switch.push_str(&format!(
            "\n  if id_string in {}:\n    return id_string + \">>\" + {}(target, id_string)\n",
            map_name, function_name
        ));
    }

    format!(
        "{}\n# Label Map Section\n{}\n\n# Function Def Section\n{}\n{}\n\
         def format(target):\n  id_string = str(target.label) + \"|\" + get_arch(target)\n\n  \
         # Labels of the main repository are not always normalized.\n  \
         if id_string.startswith(\"//\"):\n    id_string = \"@\" + id_string\n\n  \
         # Main switch section\n  {}\n  \
         # Not requested, so this is a dependency of a requested target.\n  \
         return id_string + \">>NONE\"\n",
        CQUERY_STARLARK_PRELUDE, label_maps, functions, CQUERY_STARLARK_GET_ARCH, switch
    )
}
