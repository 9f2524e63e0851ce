/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::collections::BTreeMap;

use allocative::Allocative;

/// How a module is part of an APEX. Ordered from weakest to strongest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Allocative
)]
pub enum ApexMembership {
    #[default]
    NotInApex,
    IndirectlyInApex,
    DirectlyInApex,
}

impl ApexMembership {
    /// Membership after one more path into the APEX was found.
    pub fn add(self, direct: bool) -> ApexMembership {
        if self == ApexMembership::DirectlyInApex || direct {
            ApexMembership::DirectlyInApex
        } else {
            ApexMembership::IndirectlyInApex
        }
    }

    /// The stronger of the two memberships.
    pub fn merge(self, other: ApexMembership) -> ApexMembership {
        self.max(other)
    }
}

/// Membership of every module reachable from one APEX bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Allocative)]
pub struct ApexContents {
    contents: BTreeMap<String, ApexMembership>,
}

impl ApexContents {
    pub fn new(contents: BTreeMap<String, ApexMembership>) -> ApexContents {
        ApexContents { contents }
    }

    pub fn membership(&self, module_name: &str) -> ApexMembership {
        self.contents
            .get(module_name)
            .copied()
            .unwrap_or_default()
    }

    pub fn directly_in_apex(&self, module_name: &str) -> bool {
        self.membership(module_name) == ApexMembership::DirectlyInApex
    }

    pub fn in_apex(&self, module_name: &str) -> bool {
        self.membership(module_name) != ApexMembership::NotInApex
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.contents.keys().map(|k| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;

    #[test]
    fn test_add() {
        assert_eq!(
            ApexMembership::IndirectlyInApex,
            ApexMembership::NotInApex.add(false)
        );
        assert_eq!(
            ApexMembership::DirectlyInApex,
            ApexMembership::IndirectlyInApex.add(true)
        );
        assert_eq!(
            ApexMembership::DirectlyInApex,
            ApexMembership::DirectlyInApex.add(false)
        );
    }

    #[test]
    fn test_merge_takes_strongest() {
        assert_eq!(
            ApexMembership::DirectlyInApex,
            ApexMembership::IndirectlyInApex.merge(ApexMembership::DirectlyInApex)
        );
        assert_eq!(
            ApexMembership::IndirectlyInApex,
            ApexMembership::IndirectlyInApex.merge(ApexMembership::NotInApex)
        );
    }

    #[test]
    fn test_merge_is_order_independent() {
        let all = [
            ApexMembership::NotInApex,
            ApexMembership::IndirectlyInApex,
            ApexMembership::DirectlyInApex,
        ];
        for a in all {
            assert_eq!(a, a.merge(a));
            for b in all {
                assert_eq!(a.merge(b), b.merge(a));
                for c in all {
                    assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
                }
            }
        }
    }

    #[test]
    fn test_contents() {
        let contents = ApexContents::new(btreemap! {
            "libfoo".to_owned() => ApexMembership::DirectlyInApex,
            "libbar".to_owned() => ApexMembership::IndirectlyInApex,
        });
        assert!(contents.directly_in_apex("libfoo"));
        assert!(!contents.directly_in_apex("libbar"));
        assert!(contents.in_apex("libbar"));
        assert!(!contents.in_apex("libbaz"));
        assert_eq!(
            vec!["libbar", "libfoo"],
            contents.module_names().collect::<Vec<_>>()
        );
    }
}
