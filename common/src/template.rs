// Payload template rendering
//
// Recipient payload templates use ${name} placeholders, filled per attempt
// with the job id, a fresh correlation id, and the remaining-repetitions
// count. Placeholders outside the known set fail the render.

use crate::errors::TemplateError;
use regex::Regex;
use std::collections::HashMap;
use tracing::instrument;

/// PayloadRenderer substitutes `${name}` placeholders in payload templates.
pub struct PayloadRenderer {
    placeholder_regex: Regex,
}

impl PayloadRenderer {
    pub fn new() -> Result<Self, TemplateError> {
        // Matches ${name} and captures the placeholder name
        let placeholder_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| TemplateError::RegexError(e.to_string()))?;

        Ok(Self { placeholder_regex })
    }

    /// Render a template against the given placeholder values.
    ///
    /// # Errors
    /// Returns `TemplateError::UndefinedPlaceholder` if the template names a
    /// placeholder missing from `values`.
    #[instrument(skip(self, values), fields(template_len = template.len()))]
    pub fn render(
        &self,
        template: &str,
        values: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        let mut result = template.to_string();
        let mut undefined = Vec::new();

        for cap in self.placeholder_regex.captures_iter(template) {
            let full_match = cap.get(0).unwrap().as_str();
            let name = cap.get(1).unwrap().as_str();

            match values.get(name) {
                Some(value) => {
                    result = result.replace(full_match, value);
                }
                None => {
                    undefined.push(name.to_string());
                }
            }
        }

        if !undefined.is_empty() {
            tracing::error!(
                undefined_placeholders = ?undefined,
                "Undefined placeholders in payload template"
            );
            return Err(TemplateError::UndefinedPlaceholder {
                placeholders: undefined,
                template: template.to_string(),
            });
        }

        Ok(result)
    }

    /// Unique placeholder names referenced by a template.
    pub fn placeholders(&self, template: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for cap in self.placeholder_regex.captures_iter(template) {
            let name = cap.get(1).unwrap().as_str().to_string();
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }

        names
    }
}
