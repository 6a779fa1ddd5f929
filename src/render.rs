//! Payload rendering
//!
//! Templates are rendered locally with Tera before anything touches the
//! network. Undefined variables are errors, never empty strings.

use crate::error::ErrorKind;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use thiserror::Error;

/// Template variables keyed by name
pub type VariableBag = BTreeMap<String, Value>;

/// A template plus the variables to render it with
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub template: PathBuf,
    pub vars: VariableBag,
}

impl RenderRequest {
    pub fn new(template: impl Into<PathBuf>, vars: VariableBag) -> Self {
        Self {
            template: template.into(),
            vars,
        }
    }
}

#[derive(Debug, Error)]
#[error("{cause} ({})", path.display())]
pub struct RenderError {
    pub path: PathBuf,
    pub cause: String,
}

impl RenderError {
    pub fn new(path: &Path, cause: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            cause: cause.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Render
    }
}

/// Turns a local template and a variable bag into payload bytes
pub trait Renderer: Send + Sync {
    fn render(&self, template: &Path, vars: &VariableBag) -> Result<Vec<u8>, RenderError>;
}

/// Renders template files from disk with Tera
#[derive(Debug, Clone, Default)]
pub struct TeraRenderer {
    basedir: Option<PathBuf>,
}

impl TeraRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative template paths against `dir` instead of the cwd
    pub fn with_basedir(dir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: Some(dir.into()),
        }
    }

    fn resolve(&self, template: &Path) -> PathBuf {
        match &self.basedir {
            Some(dir) if template.is_relative() => dir.join(template),
            _ => template.to_path_buf(),
        }
    }
}

impl Renderer for TeraRenderer {
    fn render(&self, template: &Path, vars: &VariableBag) -> Result<Vec<u8>, RenderError> {
        let path = self.resolve(template);
        let source = std::fs::read_to_string(&path)
            .map_err(|e| RenderError::new(template, format!("unable to read template: {e}")))?;

        let context = Context::from_serialize(vars)
            .map_err(|e| RenderError::new(template, error_chain(&e)))?;

        // Payloads are XML/config, never HTML
        let rendered = Tera::one_off(&source, &context, false)
            .map_err(|e| RenderError::new(template, error_chain(&e)))?;

        tracing::trace!(
            "Rendered {} into {} bytes",
            template.display(),
            rendered.len()
        );
        Ok(rendered.into_bytes())
    }
}

/// Tera nests the useful message in the source chain
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> VariableBag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_render_substitutes_variables() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("guest.xml.j2"),
            "<domain><name>{{ guest }}</name><memory>{{ mem }}</memory></domain>",
        )
        .unwrap();

        let renderer = TeraRenderer::with_basedir(dir.path());
        let bytes = renderer
            .render(
                Path::new("guest.xml.j2"),
                &vars(&[("guest", "vm01"), ("mem", "2048")]),
            )
            .unwrap();

        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "<domain><name>vm01</name><memory>2048</memory></domain>"
        );
    }

    #[test]
    fn test_render_does_not_escape_markup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.xml");
        fs::write(&path, "{{ body }}").unwrap();

        let bytes = TeraRenderer::new()
            .render(&path, &vars(&[("body", "<disk type='file'/>")]))
            .unwrap();

        assert_eq!(bytes, b"<disk type='file'/>");
    }

    #[test]
    fn test_missing_template_reports_path() {
        let err = TeraRenderer::new()
            .render(Path::new("/nonexistent/guest.xml.j2"), &VariableBag::new())
            .unwrap_err();

        assert_eq!(err.path, PathBuf::from("/nonexistent/guest.xml.j2"));
        assert!(err.to_string().contains("/nonexistent/guest.xml.j2"));
        assert_eq!(err.kind(), ErrorKind::Render);
    }

    #[test]
    fn test_unresolved_variable_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guest.xml.j2");
        fs::write(&path, "<name>{{ undefined_guest }}</name>").unwrap();

        let err = TeraRenderer::new()
            .render(&path, &VariableBag::new())
            .unwrap_err();

        assert!(err.cause.contains("undefined_guest"), "cause: {}", err.cause);
    }
}
