/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::cmp::Ordering;
use std::fmt;

use allocative::Allocative;

/// Integer used for API levels that have not been finalized yet.
pub const FUTURE_API_LEVEL_INT: i32 = 10000;

const NONE_API_LEVEL_INT: i32 = -1;

/// Codenames of API levels that were already released.
const FINAL_CODENAMES: &[(&str, i32)] = &[
    ("Q", 29),
    ("R", 30),
    ("S", 31),
    ("Sv2", 32),
    ("Tiramisu", 33),
    ("UpsideDownCake", 34),
    ("VanillaIceCream", 35),
];

#[derive(Debug, thiserror::Error)]
pub enum ApiLevelError {
    #[error("API level string must be non-empty")]
    Empty,
    #[error("{0:?} could not be parsed as an integer and is not a recognized codename")]
    Unrecognized(String),
}

/// An Android API level as written in `min_sdk_version` and friends.
///
/// Preview levels (codenames and `current`) compare as the future level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Allocative)]
pub struct ApiLevel {
    value: String,
    number: i32,
    is_preview: bool,
}

impl ApiLevel {
    /// The level used when no version was specified.
    pub fn none() -> ApiLevel {
        ApiLevel {
            value: "(no version)".to_owned(),
            number: NONE_API_LEVEL_INT,
            is_preview: true,
        }
    }

    pub fn future() -> ApiLevel {
        ApiLevel {
            value: "current".to_owned(),
            number: FUTURE_API_LEVEL_INT,
            is_preview: true,
        }
    }

    /// A released API level. No validation is done on `number`.
    pub fn from_final(number: i32) -> ApiLevel {
        ApiLevel {
            value: number.to_string(),
            number,
            is_preview: false,
        }
    }

    fn from_preview(codename: &str) -> ApiLevel {
        ApiLevel {
            value: codename.to_owned(),
            number: FUTURE_API_LEVEL_INT,
            is_preview: true,
        }
    }

    /// Parses a user supplied level. `active_codenames` lists the codenames of
    /// the platform currently in development.
    pub fn from_user(raw: &str, active_codenames: &[String]) -> Result<ApiLevel, ApiLevelError> {
        if raw.is_empty() {
            return Err(ApiLevelError::Empty);
        }
        if raw == "current" {
            return Ok(ApiLevel::future());
        }
        if active_codenames.iter().any(|c| c == raw) {
            return Ok(ApiLevel::from_preview(raw));
        }
        if let Some((_, n)) = FINAL_CODENAMES.iter().find(|(c, _)| *c == raw) {
            return Ok(ApiLevel::from_final(*n));
        }
        raw.parse::<i32>()
            .map(ApiLevel::from_final)
            .map_err(|_| ApiLevelError::Unrecognized(raw.to_owned()))
    }

    pub fn is_none(&self) -> bool {
        self.number == NONE_API_LEVEL_INT
    }

    pub fn specified(&self) -> bool {
        !self.is_none()
    }

    pub fn is_preview(&self) -> bool {
        self.is_preview
    }

    pub fn is_current(&self) -> bool {
        self.value == "current"
    }

    /// The integer value of a final level, or the future level for previews.
    pub fn final_or_future_int(&self) -> i32 {
        if self.is_preview {
            FUTURE_API_LEVEL_INT
        } else {
            self.number
        }
    }

    pub fn compare_to(&self, other: &ApiLevel) -> Ordering {
        self.number.cmp(&other.number)
    }

    pub fn greater_than(&self, other: &ApiLevel) -> bool {
        self.compare_to(other) == Ordering::Greater
    }

    pub fn less_than_or_equal_to(&self, other: &ApiLevel) -> bool {
        self.compare_to(other) != Ordering::Greater
    }
}

impl Default for ApiLevel {
    fn default() -> Self {
        ApiLevel::none()
    }
}

impl fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_from_user() {
        let active = vec!["Baklava".to_owned()];
        assert_eq!(ApiLevel::from_final(30), ApiLevel::from_user("30", &active).unwrap());
        assert_eq!(ApiLevel::from_final(33), ApiLevel::from_user("Tiramisu", &active).unwrap());
        assert_eq!(ApiLevel::future(), ApiLevel::from_user("current", &active).unwrap());

        let baklava = ApiLevel::from_user("Baklava", &active).unwrap();
        assert!(baklava.is_preview());
        assert_eq!(FUTURE_API_LEVEL_INT, baklava.final_or_future_int());
        assert_eq!("Baklava", baklava.to_string());

        assert_matches!(ApiLevel::from_user("", &active), Err(ApiLevelError::Empty));
        assert_matches!(
            ApiLevel::from_user("Zzz", &active),
            Err(ApiLevelError::Unrecognized(s)) if s == "Zzz"
        );
    }

    #[test]
    fn test_none_and_ordering() {
        let none = ApiLevel::none();
        assert!(none.is_none());
        assert!(!none.specified());
        assert!(ApiLevel::from_final(29).less_than_or_equal_to(&ApiLevel::from_final(30)));
        assert!(ApiLevel::future().greater_than(&ApiLevel::from_final(35)));
        assert_eq!(29, ApiLevel::from_final(29).final_or_future_int());
    }
}
