/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Quoting of strings embedded in generated shell commands.

use std::borrow::Cow;

pub use shlex::QuoteError;

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '=' | '.' | ',' | '/')
}

/// Quote `s` unless every character is safe in a bare shell word.
/// Spaces are unsafe, so the result is always a single word.
pub fn shell_escape_including_spaces(s: &str) -> Result<Cow<'_, str>, QuoteError> {
    if !s.is_empty() && s.chars().all(is_shell_safe) {
        Ok(Cow::Borrowed(s))
    } else {
        shlex::try_quote(s)
    }
}

/// Quote each argument and join them into one command line.
pub fn shell_join<'a>(args: impl IntoIterator<Item = &'a str>) -> Result<String, QuoteError> {
    let words = args
        .into_iter()
        .map(shell_escape_including_spaces)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(words.join(" "))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_safe_words_are_left_bare() {
        assert_eq!(
            "foo/bar-1.0_x+y=z,w.txt",
            shell_escape_including_spaces("foo/bar-1.0_x+y=z,w.txt").unwrap()
        );
        assert_matches!(
            shell_escape_including_spaces("plain"),
            Ok(Cow::Borrowed("plain"))
        );
    }

    #[test]
    fn test_empty_is_quoted() {
        assert_eq!("''", shell_escape_including_spaces("").unwrap());
    }

    #[test]
    fn test_unsafe_words_survive_the_shell() {
        for word in ["a b", "it's", "$HOME", "x;y", "a\"b"] {
            let quoted = shell_escape_including_spaces(word).unwrap();
            assert_ne!(word, quoted);
            assert_eq!(Some(vec![word.to_owned()]), shlex::split(&quoted));
        }
    }

    #[test]
    fn test_join() {
        let line = shell_join(["cc", "-o", "out dir/a.o", "a.c"]).unwrap();
        assert!(line.starts_with("cc -o "));
        assert!(line.ends_with(" a.c"));
        assert_eq!(
            Some(vec![
                "cc".to_owned(),
                "-o".to_owned(),
                "out dir/a.o".to_owned(),
                "a.c".to_owned()
            ]),
            shlex::split(&line)
        );
    }

    #[test]
    fn test_nul_byte_is_rejected() {
        assert_matches!(shell_escape_including_spaces("a\0b"), Err(QuoteError::Nul));
        assert_matches!(shell_join(["ok", "a\0b"]), Err(QuoteError::Nul));
    }
}
