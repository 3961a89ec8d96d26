//! Script documents and the job payload derived from them.
//!
//! A source script is organised as ordered sections, each holding its own
//! ordered conversation lines. The generation backend wants the flat form:
//! one ordered list of lines, each tagged with the key of the section it
//! came from, plus the section descriptors themselves.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default conversation mode sent with every generation request.
pub const DEFAULT_CONVERSATION_MODE: &str = "dialogue";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One spoken line of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationLine {
    pub speaker: String,
    /// Text shown on screen.
    pub text: String,
    /// Alternate text fed to the voice synthesiser, when it differs from
    /// the displayed text (readings, pronunciation hints).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_text: Option<String>,
    /// Expression/emotion tag for the speaker's avatar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Key of the [`VideoSection`] this line belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Section descriptor sent alongside the flattened lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSection {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgm_volume: Option<f32>,
}

/// A section of a source script as returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSection {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub bgm: Option<String>,
    #[serde(default)]
    pub bgm_volume: Option<f32>,
    #[serde(default)]
    pub conversations: Vec<ConversationLine>,
}

/// Structured content of one source script.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sections: Vec<ScriptSection>,
}

// ---------------------------------------------------------------------------
// Job input
// ---------------------------------------------------------------------------

/// Per-run generation flags applied to every job in a batch.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub enable_subtitles: bool,
    pub conversation_mode: String,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            enable_subtitles: true,
            conversation_mode: DEFAULT_CONVERSATION_MODE.to_string(),
        }
    }
}

/// One unit of rendering work handed to the batch orchestrator.
#[derive(Debug, Clone)]
pub struct JobInput {
    /// Originating file name. Used for reporting and for marking the
    /// source processed; never sent in the generation request.
    pub source_label: String,
    pub conversations: Vec<ConversationLine>,
    pub sections: Vec<VideoSection>,
    pub title: Option<String>,
    pub enable_subtitles: bool,
    pub conversation_mode: String,
}

impl JobInput {
    /// Flatten a script document into a validated job input.
    ///
    /// Sections keep their order and every line keeps its order within its
    /// section. Each line is tagged with its section key, overriding any
    /// linkage the document already carried.
    pub fn from_script(
        source_label: impl Into<String>,
        document: ScriptDocument,
        options: &GenerationOptions,
    ) -> Result<Self, CoreError> {
        let source_label = source_label.into();
        let mut conversations = Vec::new();
        let mut sections = Vec::with_capacity(document.sections.len());

        for section in document.sections {
            for mut line in section.conversations {
                line.section = Some(section.key.clone());
                conversations.push(line);
            }
            sections.push(VideoSection {
                name: section.name,
                key: section.key,
                background: section.background,
                bgm: section.bgm,
                bgm_volume: section.bgm_volume,
            });
        }

        let input = Self {
            source_label,
            conversations,
            sections,
            title: document.title.filter(|t| !t.trim().is_empty()),
            enable_subtitles: options.enable_subtitles,
            conversation_mode: options.conversation_mode.clone(),
        };
        input.validate()?;
        Ok(input)
    }

    /// Check that the payload is worth submitting.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.source_label.trim().is_empty() {
            return Err(CoreError::Validation(
                "Job input must carry a source label".to_string(),
            ));
        }
        if self.conversations.is_empty() {
            return Err(CoreError::Validation(format!(
                "Script '{}' has no conversation lines",
                self.source_label
            )));
        }
        if let Some(pos) = self
            .conversations
            .iter()
            .position(|line| line.text.trim().is_empty())
        {
            return Err(CoreError::Validation(format!(
                "Script '{}' line {} has empty text",
                self.source_label,
                pos + 1
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn line(speaker: &str, text: &str) -> ConversationLine {
        ConversationLine {
            speaker: speaker.to_string(),
            text: text.to_string(),
            voice_text: None,
            expression: None,
            section: None,
        }
    }

    fn section(key: &str, lines: Vec<ConversationLine>) -> ScriptSection {
        ScriptSection {
            name: format!("Section {key}"),
            key: key.to_string(),
            background: Some(format!("{key}.png")),
            bgm: None,
            bgm_volume: Some(0.3),
            conversations: lines,
        }
    }

    #[test]
    fn flattens_sections_in_order_and_tags_lines() {
        let doc = ScriptDocument {
            title: Some("Episode 1".into()),
            sections: vec![
                section("intro", vec![line("a", "hello"), line("b", "hi")]),
                section("main", vec![line("a", "so")]),
            ],
        };

        let input = JobInput::from_script("ep1.json", doc, &GenerationOptions::default()).unwrap();

        let texts: Vec<_> = input.conversations.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["hello", "hi", "so"]);
        let keys: Vec<_> = input
            .conversations
            .iter()
            .map(|l| l.section.as_deref().unwrap())
            .collect();
        assert_eq!(keys, ["intro", "intro", "main"]);
        assert_eq!(input.sections.len(), 2);
        assert_eq!(input.sections[1].key, "main");
        assert_eq!(input.title.as_deref(), Some("Episode 1"));
        assert_eq!(input.conversation_mode, DEFAULT_CONVERSATION_MODE);
        assert!(input.enable_subtitles);
    }

    #[test]
    fn blank_title_is_dropped() {
        let doc = ScriptDocument {
            title: Some("  ".into()),
            sections: vec![section("s", vec![line("a", "x")])],
        };
        let input = JobInput::from_script("f", doc, &GenerationOptions::default()).unwrap();
        assert!(input.title.is_none());
    }

    #[test]
    fn rejects_script_without_lines() {
        let doc = ScriptDocument {
            title: None,
            sections: vec![section("empty", vec![])],
        };
        let err = JobInput::from_script("empty.json", doc, &GenerationOptions::default());
        assert_matches!(err, Err(CoreError::Validation(msg)) if msg.contains("empty.json"));
    }

    #[test]
    fn rejects_line_with_blank_text() {
        let doc = ScriptDocument {
            title: None,
            sections: vec![section("s", vec![line("a", "ok"), line("b", " ")])],
        };
        let err = JobInput::from_script("f.json", doc, &GenerationOptions::default());
        assert_matches!(err, Err(CoreError::Validation(msg)) if msg.contains("line 2"));
    }

    #[test]
    fn deserializes_document_with_missing_optional_fields() {
        let json = r#"{"sections":[{"name":"Intro","key":"intro","conversations":[{"speaker":"a","text":"hi"}]}]}"#;
        let doc: ScriptDocument = serde_json::from_str(json).unwrap();
        assert!(doc.title.is_none());
        assert_eq!(doc.sections[0].conversations[0].speaker, "a");
        assert!(doc.sections[0].bgm_volume.is_none());
    }

    #[test]
    fn line_serialization_skips_absent_fields() {
        let json = serde_json::to_value(line("a", "hi")).unwrap();
        assert_eq!(json, serde_json::json!({"speaker": "a", "text": "hi"}));
    }
}
