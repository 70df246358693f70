//! Upstream (provider) error presentation.

use std::sync::LazyLock;

use regex::Regex;

/// Hint shown when the provider rejected the model or tool name.
pub const MODEL_NOT_ENABLED_HINT: &str =
    "The selected model is not enabled for this deployment. Pick another model or ask an administrator to enable it.";

static MODEL_REJECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(model|tool|function)\b.{0,80}?\b(not found|does not exist|not enabled|not supported|not available|invalid|unknown|malformed)\b|\b(unknown|invalid|unsupported|malformed)\b.{0,20}?\b(model|tool|function)\b",
    )
    .expect("model rejection pattern is valid")
});

/// Map provider error text to a user-facing message.
///
/// Errors naming a rejected model or tool become [`MODEL_NOT_ENABLED_HINT`];
/// anything else is passed through trimmed.
pub fn upstream_error_hint(text: &str) -> String {
    if MODEL_REJECTED.is_match(text) {
        MODEL_NOT_ENABLED_HINT.to_string()
    } else {
        text.trim().to_string()
    }
}
