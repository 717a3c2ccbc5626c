//! Sandboxed execution engine.
//!
//! Each module instance is a self-contained unit: the transpiled and parsed
//! program, a read-only configuration snapshot, and a mount id scoping its
//! output. Evaluation runs on a blocking task so a panic surfaces as a
//! contained join error, and every mount is bounded by a timeout. Any
//! failure - parse, evaluation, panic, or timeout - is replaced by an inert,
//! visibly-marked placeholder confined to that module's mount point;
//! sibling instances on the same page are mutually independent.
//!
//! Render health is reported over an explicit channel so the host can track
//! per-module success without inspecting sandboxed content.

mod template;
mod transpile;

pub use template::ModuleProgram;
pub use transpile::transpile;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::error::{ModuleError, Result};
use crate::loader::RenderableModule;

/// Default bounded wait per module mount
pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a mount produced module output or a placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountStatus {
    Mounted,
    Failed,
}

/// One mounted module's output, placeholder included on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountOutcome {
    pub module_id: String,
    pub name: String,
    pub mount_id: String,
    pub status: MountStatus,
    /// Rendered markup, or the inert error placeholder
    pub html: String,
    /// Module styles scoped to the mount point; empty on failure
    pub styles: String,
    pub elapsed_ms: u128,
    pub failure: Option<String>,
}

/// Asynchronous per-mount health signal for the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub module_id: String,
    pub mount_id: String,
    pub status: MountStatus,
    pub elapsed_ms: u128,
    pub reason: Option<String>,
}

/// Executes module programs in isolation
pub struct SandboxEngine {
    mount_timeout: Duration,
    health_tx: Option<mpsc::Sender<HealthReport>>,
    /// Artificial delay inside the render task; only settable from tests
    render_delay: Duration,
}

impl SandboxEngine {
    pub fn new() -> Self {
        Self {
            mount_timeout: DEFAULT_MOUNT_TIMEOUT,
            health_tx: None,
            render_delay: Duration::ZERO,
        }
    }

    /// Override the bounded wait applied to each mount
    pub fn with_timeout(mut self, mount_timeout: Duration) -> Self {
        self.mount_timeout = mount_timeout;
        self
    }

    #[cfg(test)]
    fn with_render_delay(mut self, render_delay: Duration) -> Self {
        self.render_delay = render_delay;
        self
    }

    /// Attach the health channel; the returned receiver gets one report per
    /// mount. Reports are best-effort: a full channel drops, never blocks.
    pub fn health_reports(&mut self, capacity: usize) -> mpsc::Receiver<HealthReport> {
        let (tx, rx) = mpsc::channel(capacity);
        self.health_tx = Some(tx);
        rx
    }

    /// Mount one module. Never fails: every error path yields a placeholder
    /// outcome confined to this module's mount point.
    #[instrument(skip(self, module), fields(module_id = %module.id))]
    pub async fn mount(&self, module: &RenderableModule) -> MountOutcome {
        let started = Instant::now();
        let mount_id = format!("modbay-{}", module.id);

        let work = {
            let module = module.clone();
            let delay = self.render_delay;
            tokio::task::spawn_blocking(move || -> Result<String> {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                let instance = SandboxInstance::build(&module)?;
                instance.render()
            })
        };

        let rendered = match tokio::time::timeout(self.mount_timeout, work).await {
            Err(_) => Err(format!(
                "mount timed out after {:?}",
                self.mount_timeout
            )),
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err("module panicked during mount".to_string())
            }
            Ok(Err(join_err)) => Err(format!("mount task failed: {join_err}")),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Ok(Ok(html))) => Ok(html),
        };

        let elapsed_ms = started.elapsed().as_millis();
        let outcome = match rendered {
            Ok(html) => {
                debug!(elapsed_ms, "Module mounted");
                MountOutcome {
                    module_id: module.id.clone(),
                    name: module.name.clone(),
                    html: format!(r#"<div id="{mount_id}" class="modbay-module">{html}</div>"#),
                    styles: scope_styles(&mount_id, &module.styles),
                    mount_id,
                    status: MountStatus::Mounted,
                    elapsed_ms,
                    failure: None,
                }
            }
            Err(reason) => {
                warn!(%reason, "Module mount failed; emitting placeholder");
                MountOutcome {
                    module_id: module.id.clone(),
                    name: module.name.clone(),
                    html: error_placeholder(&mount_id, &module.name),
                    styles: String::new(),
                    mount_id,
                    status: MountStatus::Failed,
                    elapsed_ms,
                    failure: Some(reason),
                }
            }
        };

        self.report_health(&outcome);
        outcome
    }

    /// Mount a page's worth of modules concurrently. Instances share no
    /// mutable state; one failure never affects its siblings.
    pub async fn mount_all(&self, modules: &[RenderableModule]) -> Vec<MountOutcome> {
        join_all(modules.iter().map(|m| self.mount(m))).await
    }

    fn report_health(&self, outcome: &MountOutcome) {
        let Some(tx) = &self.health_tx else { return };
        let report = HealthReport {
            module_id: outcome.module_id.clone(),
            mount_id: outcome.mount_id.clone(),
            status: outcome.status,
            elapsed_ms: outcome.elapsed_ms,
            reason: outcome.failure.clone(),
        };
        if tx.try_send(report).is_err() {
            warn!(module_id = %outcome.module_id, "Health channel full; dropping report");
        }
    }
}

impl Default for SandboxEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A single module instance: parsed program plus its injected config
struct SandboxInstance {
    module_id: String,
    program: ModuleProgram,
    /// Read-only snapshot; the instance never gets a mutable view
    config: Value,
}

impl SandboxInstance {
    fn build(module: &RenderableModule) -> Result<Self> {
        let code = transpile(&module.code).map_err(|e| ModuleError::Render {
            module_id: module.id.clone(),
            reason: format!("{e:#}"),
        })?;
        let program = ModuleProgram::parse(&code).map_err(|e| ModuleError::Render {
            module_id: module.id.clone(),
            reason: format!("{e:#}"),
        })?;

        let config = json!({
            "module": {
                "id": module.id,
                "name": module.name,
                "version": module.version,
            },
            "settings": module.merged_settings,
        });

        Ok(Self {
            module_id: module.id.clone(),
            program,
            config,
        })
    }

    fn render(&self) -> Result<String> {
        self.program
            .render(&self.config)
            .map_err(|e| ModuleError::Render {
                module_id: self.module_id.clone(),
                reason: format!("{e:#}"),
            })
    }
}

/// Inert, visibly-marked placeholder confined to the module's mount point
fn error_placeholder(mount_id: &str, name: &str) -> String {
    format!(
        r#"<div id="{mount_id}" class="modbay-module modbay-module-error" role="note">Module "{name}" failed to load</div>"#
    )
}

/// Prefix every selector with the mount id so one module's CSS cannot leak
/// into siblings. At-rules are passed through untouched.
///
/// The result is emitted inside a host `<style>` block, so `<` is stripped
/// first; a sheet containing `</style>` must not close the block.
fn scope_styles(mount_id: &str, styles: &str) -> String {
    let styles = styles.replace('<', "");
    let mut out = String::with_capacity(styles.len());

    for rule in styles.split_inclusive('}') {
        let Some((selectors, body)) = rule.split_once('{') else {
            out.push_str(rule);
            continue;
        };

        let trimmed = selectors.trim();
        if trimmed.starts_with('@') || trimmed.is_empty() {
            out.push_str(rule);
            continue;
        }

        let scoped: Vec<String> = trimmed
            .split(',')
            .map(|s| format!("#{mount_id} {}", s.trim()))
            .collect();
        out.push_str(&scoped.join(", "));
        out.push_str(" {");
        out.push_str(body);
    }

    out
}
