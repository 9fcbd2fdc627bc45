//! Typed reads over schemaless `spec`/`jobTemplate`/`defaults` subtrees.
//!
//! `Component.spec`, provider `jobTemplate` and `defaults` are free-form
//! YAML/JSON maps the core carries by value but only ever reads a handful of
//! known-string leaves from (`module.source`, `chart.path`, ...). Funnel
//! those reads through here rather than downcasting ad hoc at each call
//! site.

use serde_json::Value;

/// Looks up a dotted path (`"module.source"`) in a JSON object and returns
/// its value as a string, if present and string-typed.
pub fn lookup_str<'a>(value: &'a Value, dotted_path: &str) -> Option<&'a str> {
    let mut current = value;
    for segment in dotted_path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    current.as_str()
}

/// Looks up a dotted path and returns it as a sequence of objects, if
/// present and array-typed.
pub fn lookup_seq<'a>(value: &'a Value, dotted_path: &str) -> Option<&'a Vec<Value>> {
    let mut current = value;
    for segment in dotted_path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    current.as_array()
}

/// Reads the `target` string field out of a relationship-shaped map entry
/// (`{target: "...", ...}`). Malformed entries (missing/non-string target)
/// are skipped by the caller, never fatal — see spec §7 Warnings.
pub fn relationship_target(entry: &Value) -> Option<&str> {
    entry.as_object()?.get("target")?.as_str()
}
