use std::fmt::Write;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRow {
    pub student: String,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentFeedback {
    pub student: String,
    pub feedback: Vec<String>,
}

impl StudentFeedback {
    /// Feedback entries joined with newlines, blank entries dropped.
    pub fn joined_text(&self) -> String {
        self.feedback
            .iter()
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A passage as produced by document splitting, before it is embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub source_name: String,
    pub page: Option<u32>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub source_name: String,
    pub page: Option<u32>,
    pub text: String,
    pub score: f32,
}

impl RetrievedPassage {
    pub fn label(&self) -> String {
        match self.page {
            Some(page) => format!("{}, page {}", self.source_name, page),
            None => self.source_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialLocation {
    pub weak_point: String,
    pub location: String,
}

/// Output of the material locator: structured entries when the model kept to
/// the JSON contract, otherwise only the raw reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialMap {
    pub locations: Vec<MaterialLocation>,
    pub raw: String,
}

impl MaterialMap {
    pub fn is_structured(&self) -> bool {
        !self.locations.is_empty()
    }

    pub fn render(&self) -> String {
        if !self.is_structured() {
            return self.raw.clone();
        }

        let mut output = String::new();
        for entry in &self.locations {
            let _ = writeln!(output, "- {} -> {}", entry.weak_point, entry.location);
        }
        output.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_text_skips_blank_entries() {
        let student = StudentFeedback {
            student: "S1".to_string(),
            feedback: vec![
                "Joins were incorrect".to_string(),
                "   ".to_string(),
                String::new(),
                " Needs GROUP BY practice ".to_string(),
            ],
        };
        assert_eq!(
            student.joined_text(),
            "Joins were incorrect\nNeeds GROUP BY practice"
        );
    }

    #[test]
    fn render_falls_back_to_raw_text() {
        let map = MaterialMap {
            locations: Vec::new(),
            raw: "Joins: slides 10-12".to_string(),
        };
        assert_eq!(map.render(), "Joins: slides 10-12");

        let map = MaterialMap {
            locations: vec![MaterialLocation {
                weak_point: "Joins".to_string(),
                location: "Advanced SQL I, slides 10-12".to_string(),
            }],
            raw: "[...]".to_string(),
        };
        assert_eq!(map.render(), "- Joins -> Advanced SQL I, slides 10-12");
    }

    #[test]
    fn label_includes_page_when_known() {
        let passage = RetrievedPassage {
            source_name: "Syllabus.pdf".to_string(),
            page: Some(2),
            text: "Week 3".to_string(),
            score: 0.5,
        };
        assert_eq!(passage.label(), "Syllabus.pdf, page 2");
    }
}
