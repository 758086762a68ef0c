use std::io;

use thiserror::Error;

/// Classification of a tool-handler failure, derived from the handler's
/// `anyhow::Error` by sniffing the wrapped `io::ErrorKind` the same way
/// `aigent-runtime`'s git tooling distinguishes failure modes, extended here
/// with the permission/space/security branches a third-party tool handler
/// can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ToolErrorCategory {
    #[error("permission denied")]
    Permission,
    #[error("path not found")]
    Path,
    #[error("target already exists")]
    Exists,
    #[error("insufficient space")]
    Space,
    #[error("security boundary violated")]
    Security,
    #[error("argument validation failed")]
    Validation,
    #[error("tool execution failed")]
    Other,
}

impl ToolErrorCategory {
    /// Classifies a handler failure by sniffing its `io::ErrorKind` (when the
    /// error chain carries one) and falling back to keyword matching on the
    /// rendered message for failure modes `std::io` has no dedicated kind for
    /// (disk space, sandbox/security denials).
    pub fn classify(err: &anyhow::Error) -> Self {
        if let Some(io_err) = err.chain().find_map(|cause| cause.downcast_ref::<io::Error>()) {
            match io_err.kind() {
                io::ErrorKind::PermissionDenied => return ToolErrorCategory::Permission,
                io::ErrorKind::NotFound => return ToolErrorCategory::Path,
                io::ErrorKind::AlreadyExists => return ToolErrorCategory::Exists,
                _ => {}
            }
        }

        let message = err.to_string().to_lowercase();
        if message.contains("no space") || message.contains("disk full") || message.contains("quota") {
            ToolErrorCategory::Space
        } else if message.contains("escapes") || message.contains("sandbox") || message.contains("denied by policy")
        {
            ToolErrorCategory::Security
        } else if message.contains("permission") {
            ToolErrorCategory::Permission
        } else if message.contains("not found") || message.contains("no such file") {
            ToolErrorCategory::Path
        } else if message.contains("already exists") {
            ToolErrorCategory::Exists
        } else {
            ToolErrorCategory::Other
        }
    }

    /// A short, direct remediation suffix appended to the failed tool's
    /// `error` field so the LLM has a concrete next step on retry, in the
    /// voice of `aigent-runtime`'s own approval/policy error messages.
    pub fn remediation(self) -> &'static str {
        match self {
            ToolErrorCategory::Permission => {
                "Request a path or operation that the current approval mode permits, or ask the operator to grant access."
            }
            ToolErrorCategory::Path => "Check the path exists and is spelled correctly before retrying.",
            ToolErrorCategory::Exists => "Use a different target name, or pass an explicit overwrite flag if the tool supports one.",
            ToolErrorCategory::Space => "Free up space or write a smaller payload before retrying.",
            ToolErrorCategory::Security => "This target is outside the allowed boundary; choose a path inside the workspace.",
            ToolErrorCategory::Validation => "Fix the arguments to match the tool's declared schema and retry.",
            ToolErrorCategory::Other => "Inspect the error above and adjust the call before retrying.",
        }
    }
}
