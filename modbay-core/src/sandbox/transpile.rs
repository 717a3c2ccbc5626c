//! Conservative syntactic strip over the accepted module-code subset.
//!
//! This is not a compiler frontend. It removes the TypeScript-flavored
//! surface (imports, interface/type declarations, annotations) and rebinds
//! the default export to a local name, over a restricted code shape. Any
//! residue it cannot make sense of is rejected later by the parser stage
//! and contained as a render failure; nothing here is ever executed as-is.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Local binding the default export is rewritten to
pub const MODULE_BINDING: &str = "__module";

static IMPORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*import\s+[^;\n]*;?\s*$"#).expect("static pattern"));

/// Interface blocks without nested braces (the subset does not allow them)
static INTERFACE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:export\s+)?interface\s+\w+(?:\s+extends\s+[\w,\s]+)?\s*\{[^}]*\}\s*;?")
        .expect("static pattern")
});

static TYPE_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:export\s+)?type\s+\w+(?:<[^>\n]*>)?\s*=[^;\n]*;\s*$")
        .expect("static pattern")
});

/// Parameter annotations: `(config: ModuleConfig)` -> `(config)`
static PARAM_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([(,]\s*\w+)\s*:\s*[A-Za-z_][\w.]*(?:<[^>)]*>)?(?:\[\])?")
        .expect("static pattern")
});

/// Return-type annotations: `): string {` -> `) {`
static RETURN_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\)\s*:\s*[A-Za-z_][\w.]*(?:<[^>{]*>)?(?:\[\])?\s*\{").expect("static pattern")
});

static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*export\s+default\s+").expect("static pattern"));

static EXPORT_MODIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\s*)export\s+(const|let|function)\b").expect("static pattern"));

/// Strip the typed surface from author code and rebind the default export.
///
/// Fails when the code has no default export at all - without one there is
/// no module to instantiate.
pub fn transpile(source: &str) -> Result<String> {
    if !EXPORT_DEFAULT.is_match(source) {
        bail!("module code has no default export");
    }

    let code = IMPORT_LINE.replace_all(source, "");
    let code = INTERFACE_BLOCK.replace_all(&code, "");
    let code = TYPE_ALIAS.replace_all(&code, "");
    let code = PARAM_ANNOTATION.replace_all(&code, "$1");
    let code = RETURN_ANNOTATION.replace_all(&code, ") {");
    let code = EXPORT_DEFAULT.replace_all(&code, format!("const {MODULE_BINDING} = "));
    let code = EXPORT_MODIFIER.replace_all(&code, "$1$2");

    Ok(code.into_owned())
}
