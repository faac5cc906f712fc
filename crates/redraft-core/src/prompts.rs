//! Prompt templates as configuration.
//!
//! Every prompt the strategies send lives here, not inline in strategy
//! code. Templates use `{name}` placeholders filled by [`render`]. A JSON
//! file can override any subset of templates; missing fields fall back to
//! the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// The full set of prompt templates used by the reconstruction strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub direct_system: String,
    pub direct_user: String,

    pub diagnostic_system: String,
    pub diagnostic_conservative: String,
    pub diagnostic_aggressive: String,

    pub outline_extract_system: String,
    pub outline_extract_user: String,
    pub outline_section_system: String,
    pub outline_section_user: String,

    pub cross_chunk_system: String,
    pub cross_chunk_user: String,

    pub expansion_system: String,
    pub expansion_user: String,

    pub position_system: String,
    pub position_user: String,
}

impl PromptSet {
    /// Load templates from a JSON file, falling back to defaults for any
    /// missing field or when the file is absent or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(prompts) => prompts,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse prompts file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// Fill `{name}` placeholders in a template.
///
/// Unknown placeholders are left intact so a template typo shows up in the
/// rendered prompt instead of silently disappearing.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

/// Optional domain clause appended to system prompts.
pub fn domain_clause(target_domain: Option<&str>) -> String {
    match target_domain {
        Some(domain) if !domain.trim().is_empty() => {
            format!(" Write for the {} domain, using its customary register and terminology.", domain.trim())
        }
        _ => String::new(),
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            direct_system: "You are an expert editor. Follow the writer's instructions exactly. \
                Preserve the writer's voice and do not invent facts, names, or examples that are \
                not in the source text.{domain}"
                .to_string(),
            direct_user: "Instructions:\n{instructions}\n\nText:\n{text}\n\nReturn only the revised text."
                .to_string(),

            diagnostic_system: "You are an expert editor who diagnoses argumentative defects and \
                repairs them surgically. The possible diagnoses are: vague-claim, weak-argument, \
                false-claim, obscure-but-sound, needs-empirical-support, elliptical. Preserve the \
                author's voice. Never fabricate examples, names, or data absent from the source; \
                only under needs-empirical-support may you add real-world, verifiable evidence.{domain}"
                .to_string(),
            diagnostic_conservative: "Diagnose the single most salient defect in the text below, \
                then repair only that defect, leaving everything else untouched.\n\nText:\n{text}\n\n\
                Respond in exactly this format:\nDIAGNOSIS: <label>\n\n<repaired text>"
                .to_string(),
            diagnostic_aggressive: "Diagnose every argumentative defect in the text below, then \
                repair each one, point by point, keeping the author's structure where sound.\n\n\
                Text:\n{text}\n\nRespond in exactly this format:\nDIAGNOSIS: <label of the primary defect>\n\n<repaired text>"
                .to_string(),

            outline_extract_system: "You extract the structural skeleton of a document.{domain}"
                .to_string(),
            outline_extract_user: "Extract an outline of the following document as JSON with \
                exactly these fields: \"thesis\" (string), \"key_points\" (array of strings, one \
                per major section, in document order), \"key_terms\" (array of strings), \
                \"constraints\" (array of strings describing tone, audience, and commitments the \
                rewrite must keep).\n\nDocument:\n{text}\n\nReturn only the JSON object."
                .to_string(),
            outline_section_system: "You rewrite one section of a document at a time while \
                honoring a fixed global outline. Stay consistent with the thesis, key terms, and \
                constraints. Do not introduce facts absent from the source.{domain}"
                .to_string(),
            outline_section_user: "Global outline (fixed for the whole document):\nThesis: {thesis}\n\
                Key points: {key_points}\nKey terms: {key_terms}\nConstraints: {constraints}\n\n\
                Rewrite the section covering this key point: {section_title}\n\nSource text for \
                this section:\n{section_source}\n\nReturn only the rewritten section."
                .to_string(),

            cross_chunk_system: "You rewrite a long document one chunk at a time. A running state \
                object records the thesis, key points, key terms, constraints, and decisions made \
                in earlier chunks; stay consistent with it and extend it with anything you \
                establish in this chunk.{domain}"
                .to_string(),
            cross_chunk_user: "Running state from earlier chunks:\n{state}\n\nWriter's \
                instructions: {instructions}\n\nChunk {chunk_index} of {total_chunks}:\n{chunk}\n\n\
                Respond as JSON with exactly two fields: \"section\" (the rewritten chunk) and \
                \"state\" (the updated state object with fields thesis, key_points, key_terms, \
                constraints, decisions). Return only the JSON object."
                .to_string(),

            expansion_system: "You expand a document toward a target length, one coherent section \
                at a time. Each section must add substance, not padding, and must follow from the \
                sections already written.{domain}"
                .to_string(),
            expansion_user: "Source text:\n{text}\n\nWriter's instructions: {instructions}\n\n\
                Target length: {target_words} words total. Sections written so far: \
                {sections_so_far}. Roughly {remaining_words} words remain.\n\nWrite the next \
                section. Start with a heading line formatted as \"## <title>\", then the section \
                body of roughly {section_words} words."
                .to_string(),

            position_system: "You transform one position from a pipe-delimited list of discrete \
                positions. Keep the same pipe-delimited field structure in your output.{domain}"
                .to_string(),
            position_user: "Instructions for the list: {instructions}\n\nPosition {index} of \
                {total}:\n{line}\n\nIf the instructions exclude this position, respond with \
                exactly SKIP. Otherwise return only the transformed line, keeping its \
                pipe-delimited structure."
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_placeholders() {
        let out = render("a {x} b {y}", &[("x", "1"), ("y", "2")]);
        assert_eq!(out, "a 1 b 2");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render("a {x} b {z}", &[("x", "1")]);
        assert_eq!(out, "a 1 b {z}");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let prompts = PromptSet::load(Path::new("/nonexistent/prompts.json"));
        assert!(prompts.diagnostic_system.contains("vague-claim"));
    }

    #[test]
    fn test_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"{"direct_system": "custom"}"#).unwrap();
        let prompts = PromptSet::load(&path);
        assert_eq!(prompts.direct_system, "custom");
        assert!(!prompts.expansion_user.is_empty());
    }

    #[test]
    fn test_domain_clause() {
        assert_eq!(domain_clause(None), "");
        assert!(domain_clause(Some("legal")).contains("legal"));
    }
}
