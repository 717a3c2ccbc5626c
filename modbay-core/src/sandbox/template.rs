//! Restricted render-definition parser and evaluator.
//!
//! The accepted module shape, after transpilation, is a declarative render
//! definition: an object with an optional `name` and a `render(config)`
//! body returning one template literal. Interpolations are dotted-path
//! lookups into the injected configuration and nothing else - there is no
//! expression evaluator, so author code has nothing to escape into. All
//! substituted values are HTML-escaped before emission.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::transpile::MODULE_BINDING;

static RENDER_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"render\s*\(\s*(\w+)\s*\)\s*\{\s*return\s*`").expect("static pattern")
});

static NAME_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"name\s*:\s*(?:"([^"]*)"|'([^']*)')"#).expect("static pattern")
});

/// `config.settings.foo.bar` / `config.module.version`
static INTERPOLATION_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\w+)\.(settings|module)((?:\.[A-Za-z_]\w*)+)\s*$").expect("static pattern")
});

/// A parsed module program, ready to render against a configuration
#[derive(Debug, Clone)]
pub struct ModuleProgram {
    /// Module-declared display name, when present
    pub name: Option<String>,
    param: String,
    template: String,
}

impl ModuleProgram {
    /// Parse transpiled code into a program.
    ///
    /// Anything outside the accepted shape is rejected here, before any
    /// evaluation happens.
    pub fn parse(code: &str) -> Result<Self> {
        if !code.contains(&format!("const {MODULE_BINDING} =")) {
            bail!("module code does not bind a default export");
        }

        let head = RENDER_HEAD
            .captures(code)
            .context("module code has no render(config) definition returning a template")?;
        let param = head[1].to_string();

        let template_start = head
            .get(0)
            .map(|m| m.end())
            .context("render definition is malformed")?;
        let rest = &code[template_start..];
        let template_end = rest
            .find('`')
            .context("render template literal is not closed")?;
        let template = rest[..template_end].to_string();

        if template.contains('\\') {
            bail!("escape sequences are not supported in render templates");
        }

        // Reject a second template literal in the body; the subset allows
        // exactly one.
        let after = &rest[template_end + 1..];
        let body_end = after.find('}').map(|i| i + 1).unwrap_or(after.len());
        if after[..body_end].contains('`') {
            bail!("render body must return a single template literal");
        }

        let program = ModuleProgram {
            name: NAME_FIELD.captures(code).and_then(|c| {
                c.get(1)
                    .or_else(|| c.get(2))
                    .map(|m| m.as_str().to_string())
            }),
            param,
            template,
        };

        // Interpolations are validated at parse time so a bad one fails the
        // mount instead of emitting half a template.
        for expr in program.interpolations() {
            program.check_expression(&expr)?;
        }

        Ok(program)
    }

    /// Evaluate the template against an injected configuration snapshot
    pub fn render(&self, config: &Value) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .context("unterminated interpolation in render template")?;
            let expr = &after[..end];

            let path = self.check_expression(expr)?;
            match lookup(config, &path) {
                Some(value) => out.push_str(&html_escape(&value_to_text(value))),
                None => {
                    warn!(expr, "Interpolation path not found in module config");
                }
            }

            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn interpolations(&self) -> Vec<String> {
        let mut exprs = Vec::new();
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else { break };
            exprs.push(after[..end].to_string());
            rest = &after[end + 1..];
        }
        exprs
    }

    /// Accept only dotted-path lookups rooted at the render parameter
    fn check_expression(&self, expr: &str) -> Result<Vec<String>> {
        let caps = INTERPOLATION_PATH
            .captures(expr)
            .with_context(|| format!("unsupported expression in interpolation: ${{{expr}}}"))?;

        if &caps[1] != self.param {
            bail!(
                "interpolation root '{}' is not the render parameter '{}'",
                &caps[1],
                self.param
            );
        }

        let mut path = vec![caps[2].to_string()];
        path.extend(caps[3].split('.').skip(1).map(str::to_string));
        Ok(path)
    }
}

fn lookup<'a>(config: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = config;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Escape for both element and attribute context
fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID: &str = r#"
const bar = {
  name: "Bar",
  render(config) {
    return `<div class="bar">${config.settings.message} v${config.module.version}</div>`;
  }
};
const __module = bar;
"#;

    fn config() -> Value {
        json!({
            "module": {"id": "m1", "name": "Bar", "version": "1.0.0"},
            "settings": {"message": "Hello"}
        })
    }

    #[test]
    fn parses_and_renders() {
        let program = ModuleProgram::parse(VALID).unwrap();
        assert_eq!(program.name.as_deref(), Some("Bar"));

        let html = program.render(&config()).unwrap();
        assert_eq!(html, "<div class=\"bar\">Hello v1.0.0</div>");
    }

    #[test]
    fn interpolated_values_are_escaped() {
        let program = ModuleProgram::parse(VALID).unwrap();
        let config = json!({
            "module": {"version": "1.0.0"},
            "settings": {"message": "<script>alert('x')</script>"}
        });

        let html = program.render(&config).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn missing_path_renders_empty() {
        let program = ModuleProgram::parse(VALID).unwrap();
        let html = program
            .render(&json!({"module": {"version": "2"}, "settings": {}}))
            .unwrap();
        assert_eq!(html, "<div class=\"bar\"> v2</div>");
    }

    #[test]
    fn arbitrary_expressions_are_rejected() {
        let code = r#"
const evil = {
  render(config) {
    return `<div>${config.settings.a + fetch("/admin")}</div>`;
  }
};
const __module = evil;
"#;
        let err = ModuleProgram::parse(code).unwrap_err();
        assert!(err.to_string().contains("unsupported expression"));
    }

    #[test]
    fn foreign_root_is_rejected() {
        let code = r#"
const evil = {
  render(config) {
    return `<div>${window.settings.a}</div>`;
  }
};
const __module = evil;
"#;
        assert!(ModuleProgram::parse(code).is_err());
    }

    #[test]
    fn missing_render_definition_is_rejected() {
        let err = ModuleProgram::parse("const __module = {};").unwrap_err();
        assert!(err.to_string().contains("render"));
    }

    #[test]
    fn missing_binding_is_rejected() {
        let code = "const x = { render(config) { return `<i></i>`; } };";
        let err = ModuleProgram::parse(code).unwrap_err();
        assert!(err.to_string().contains("default export"));
    }

    #[test]
    fn numbers_and_booleans_render_as_text() {
        let code = r#"
const counter = {
  render(config) {
    return `<span>${config.settings.count} / ${config.settings.active}</span>`;
  }
};
const __module = counter;
"#;
        let program = ModuleProgram::parse(code).unwrap();
        let html = program
            .render(&json!({"settings": {"count": 7, "active": true}}))
            .unwrap();
        assert_eq!(html, "<span>7 / true</span>");
    }
}
