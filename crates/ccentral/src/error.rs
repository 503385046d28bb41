// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::store::StoreError;

/// Errors that can escape the client to application code.
///
/// Remote-store failures outside of a required first pull are absorbed by the
/// client and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key has neither a pulled value nor a registered schema default.
    #[error("configuration key '{key}' is not defined")]
    ConfigNotDefined { key: String },

    /// The remote store could not be reached on a pull that was required to succeed.
    #[error("configuration pull failed: {0}")]
    ConfigPullFailed(#[source] StoreError),

    /// The store connection target could not be parsed.
    #[error("invalid store target: {0}")]
    InvalidTarget(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
