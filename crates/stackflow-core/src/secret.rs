//! Secret handle validation
//!
//! Secrets are referenced by path only. This module checks that a handle is
//! well formed and that it stays inside the stack's secret namespace, so a
//! read policy scoped to `/<prefix>/*` covers every handle of the stack.
//!
//! Nothing here reads a secret store.

use crate::error::{FlowError, Result};
use crate::model::SecretHandle;
use regex::Regex;
use std::sync::LazyLock;

static SECRET_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/[A-Za-z0-9_.-]+)+$").expect("valid secret path regex"));

static ENV_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env name regex"));

/// Whether a secret-store path is well formed (`/segment/segment`)
pub fn is_valid_path(path: &str) -> bool {
    SECRET_PATH.is_match(path)
}

/// Normalized prefix without a trailing slash
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Policy resource pattern granting reads below a prefix, e.g. `/doublee/*`
pub fn scope_pattern(prefix: &str) -> String {
    format!("{}/*", normalize_prefix(prefix))
}

/// Whether `path` lies below `prefix`
pub fn in_scope(path: &str, prefix: &str) -> bool {
    let prefix = normalize_prefix(prefix);
    path.strip_prefix(&prefix)
        .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1)
}

/// Handle for `name` below `prefix`
pub fn handle_for(prefix: &str, name: &str) -> SecretHandle {
    SecretHandle::new(name, format!("{}/{}", normalize_prefix(prefix), name))
}

/// Validate one handle of `node` against the stack's secret prefix
pub fn validate_handle(node: &str, handle: &SecretHandle, prefix: Option<&str>) -> Result<()> {
    if !ENV_NAME.is_match(&handle.name) {
        return Err(FlowError::validation(
            node,
            format!("secret name '{}' is not a valid variable name", handle.name),
        ));
    }

    if !is_valid_path(&handle.path) {
        return Err(FlowError::validation(
            node,
            format!("secret path '{}' is malformed", handle.path),
        ));
    }

    if let Some(prefix) = prefix
        && !in_scope(&handle.path, prefix)
    {
        return Err(FlowError::validation(
            node,
            format!(
                "secret path '{}' is outside the stack scope {}",
                handle.path,
                scope_pattern(prefix)
            ),
        ));
    }

    Ok(())
}
