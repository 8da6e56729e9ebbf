//! Prompt Store (C4)
//!
//! Loads per-subtask and per-style prompt templates from a static
//! configuration tree at startup. Read-only at runtime.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use vrenamer_common::{Result, VRenamerError};

/// One prompt file: a system message, a user template with `{{placeholder}}`
/// tokens, and default response parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    pub system: String,
    pub user_template: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Default)]
pub struct PromptStore {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptStore {
    /// Load every `*.yaml`/`*.yml` file in `dir`, keyed by file stem.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut templates = HashMap::new();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            VRenamerError::Config(format!("cannot read prompt dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| VRenamerError::Config(e.to_string()))?;
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !is_yaml {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| VRenamerError::Config(format!("bad prompt filename: {}", path.display())))?
                .to_string();
            let contents = std::fs::read_to_string(&path)?;
            let template: PromptTemplate = serde_yaml::from_str(&contents).map_err(|e| {
                VRenamerError::Config(format!("invalid prompt file {}: {e}", path.display()))
            })?;
            templates.insert(id, template);
        }

        Ok(Self { templates })
    }

    pub fn get(&self, prompt_ref: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(prompt_ref)
            .ok_or_else(|| VRenamerError::Config(format!("unknown prompt template: {prompt_ref}")))
    }

    /// Render a template's system/user text, substituting every
    /// `{{placeholder}}` token from `vars`. A placeholder with no matching
    /// entry in `vars` is a `ConfigError` (spec: templates support a closed
    /// set of named placeholders; missing ones must fail, not silently
    /// leave `{{...}}` in the rendered output).
    pub fn render(&self, prompt_ref: &str, vars: &HashMap<&str, String>) -> Result<RenderedPrompt> {
        let template = self.get(prompt_ref)?;
        Ok(RenderedPrompt {
            system: substitute(&template.system, vars)?,
            user: substitute(&template.user_template, vars)?,
        })
    }
}

fn substitute(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            out.push_str(rest);
            return Ok(out);
        };
        let end = start + end;
        let key = rest[start + 2..end].trim();

        out.push_str(&rest[..start]);
        let value = vars.get(key).ok_or_else(|| {
            VRenamerError::Config(format!("missing placeholder `{key}` in prompt template"))
        })?;
        out.push_str(value);

        rest = &rest[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn render_substitutes_known_placeholders() {
        let mut templates = HashMap::new();
        templates.insert(
            "scene".to_string(),
            PromptTemplate {
                system: "classify the {{subject}}".to_string(),
                user_template: "frames show {{subject}} in action".to_string(),
                temperature: None,
                max_tokens: None,
            },
        );
        let store = PromptStore { templates };
        let mut vars = HashMap::new();
        vars.insert("subject", "scene type".to_string());
        let rendered = store.render("scene", &vars).unwrap();
        assert_eq!(rendered.system, "classify the scene type");
        assert_eq!(rendered.user, "frames show scene type in action");
    }

    #[test]
    fn render_fails_on_missing_placeholder() {
        let mut templates = HashMap::new();
        templates.insert(
            "scene".to_string(),
            PromptTemplate {
                system: "classify the {{subject}}".to_string(),
                user_template: "no placeholders here".to_string(),
                temperature: None,
                max_tokens: None,
            },
        );
        let store = PromptStore { templates };
        let vars = HashMap::new();
        assert!(store.render("scene", &vars).is_err());
    }

    #[test]
    fn load_dir_reads_yaml_files_keyed_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("role_archetype.yaml"),
            "system: \"you are a classifier\"\nuser_template: \"{{frames}}\"\n",
        )
        .unwrap();
        let store = PromptStore::load_dir(dir.path()).unwrap();
        assert!(store.get("role_archetype").is_ok());
        assert!(store.get("missing").is_err());
    }
}
