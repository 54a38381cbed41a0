pub mod authority;
pub mod diff_scan;
pub mod injection;
pub mod sanitizer;

pub use authority::{
    check_tool_authority, filter_tools_for_authority, resolve_authority, AuthorityLevel,
    TRUSTED_TOOLS,
};
pub use diff_scan::{scan_diff, DiffReport, DiffVerdict};
pub use injection::{is_external_tool, scan_for_injection, wrap_tool_result};
pub use sanitizer::sanitize;
