/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use anyhow::Context;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `soong_android=debug`.
pub const LOG_ENV_VAR: &str = "SOONG_LOG";

pub fn filter_from_env() -> anyhow::Result<EnvFilter> {
    match std::env::var(LOG_ENV_VAR) {
        Ok(v) => EnvFilter::try_new(&v)
            .with_context(|| format!("Failed to parse ${} as a filter", LOG_ENV_VAR)),
        // Warnings and errors only unless asked otherwise.
        Err(_) => Ok(EnvFilter::new("warn")),
    }
}

/// A plain-text subscriber writing events that pass `filter` to `writer`.
pub fn subscriber_for_writer<W>(
    writer: W,
    filter: EnvFilter,
) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter);
    tracing_subscriber::registry().with(layer)
}

/// Install the global subscriber writing to `writer`, filtered by `$SOONG_LOG`.
pub fn init_tracing_for_writer<W>(writer: W) -> anyhow::Result<()>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    subscriber_for_writer(writer, filter_from_env()?)
        .try_init()
        .context("Error installing tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_once() {
        init_tracing_for_writer(std::io::sink).unwrap();
        assert!(init_tracing_for_writer(std::io::sink).is_err());
    }
}
