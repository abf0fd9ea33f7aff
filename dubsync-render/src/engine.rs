//! Tera rendering engine for change logs.
//!
//! | Template               | Output                                 |
//! |------------------------|----------------------------------------|
//! | `changelog.html.tera`  | HTML fragment for the audit log        |
//! | `changelog.txt.tera`   | plain text for the log-history column  |
//!
//! Embedded templates can be overridden per workspace by dropping `.tera`
//! files with the same relative names under `~/.dubsync/templates/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use crate::context::ChangeLog;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const HTML_TEMPLATE: &str = "changelog.html.tera";
const PLAIN_TEMPLATE: &str = "changelog.txt.tera";

const TPLS: &[(&str, &str)] = &[
    (
        "_partials/macros.tera",
        include_str!("templates/_partials/macros.tera"),
    ),
    (HTML_TEMPLATE, include_str!("templates/changelog.html.tera")),
    (PLAIN_TEMPLATE, include_str!("templates/changelog.txt.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((normalize_template_name(rel), contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

/// `<home>/.dubsync/templates/`
pub fn template_dir_at(home: &Path) -> PathBuf {
    home.join(".dubsync").join("templates")
}

// ---------------------------------------------------------------------------
// ChangeLogRenderer
// ---------------------------------------------------------------------------

/// Both renderings of one change log.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedLog {
    pub html: String,
    pub plain: String,
}

/// Renders [`ChangeLog`]s. Create once per run and reuse.
pub struct ChangeLogRenderer {
    tera: Tera,
}

impl ChangeLogRenderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_overrides(None)
    }

    /// Embedded templates plus any overrides found in `user_template_dir`.
    pub fn with_overrides(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Self {
            tera: build_tera(user_template_dir)?,
        })
    }

    pub fn render_html(&self, log: &ChangeLog) -> Result<String, RenderError> {
        Ok(self.tera.render(HTML_TEMPLATE, &log.to_tera_context()?)?)
    }

    pub fn render_plain(&self, log: &ChangeLog) -> Result<String, RenderError> {
        Ok(self.tera.render(PLAIN_TEMPLATE, &log.to_tera_context()?)?)
    }

    pub fn render(&self, log: &ChangeLog) -> Result<RenderedLog, RenderError> {
        let ctx = log.to_tera_context()?;
        Ok(RenderedLog {
            html: self.tera.render(HTML_TEMPLATE, &ctx)?,
            plain: self.tera.render(PLAIN_TEMPLATE, &ctx)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
