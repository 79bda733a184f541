use std::path::PathBuf;

use crate::error::{PipelineError, Result};

const DEFAULT_DATA_PATH: &str = "Data/Student_rubric_feedback.csv";
const DEFAULT_OUTPUT_DIR: &str = "Plans";
const DEFAULT_PERSIST_DIR: &str = "unified_index";
const DEFAULT_DOCUMENTS: [&str; 4] = [
    "Data/SQL slides/Advanced SQL I copy.pdf",
    "Data/SQL slides/Advanced SQL II copy.pptx.pdf",
    "Data/Assignment_prompt.pdf",
    "Data/Syllabus.pdf",
];
const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_TOP_K: usize = 3;
const ASSIGNMENT_QUERY: &str = "What is the ad-hoc analysis assignment_prompt?";
const SYLLABUS_QUERY: &str = "What's on the syllabus?";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_path: PathBuf,
    pub output_dir: PathBuf,
    pub columns: ColumnConfig,
    pub index: IndexConfig,
    pub model: ModelConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone)]
pub struct ColumnConfig {
    pub student: String,
    pub feedback: String,
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub persist_dir: PathBuf,
    pub documents: Vec<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub api_endpoint: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub weakpoint_query: String,
    pub material_query: String,
    pub syllabus_query: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            columns: ColumnConfig::default(),
            index: IndexConfig::default(),
            model: ModelConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            student: "Student".to_string(),
            feedback: "Feedback".to_string(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from(DEFAULT_PERSIST_DIR),
            documents: DEFAULT_DOCUMENTS.iter().map(PathBuf::from).collect(),
            chunk_size: 4000,
            chunk_overlap: 200,
            embedding_batch_size: 64,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            weakpoint_query: ASSIGNMENT_QUERY.to_string(),
            material_query: ASSIGNMENT_QUERY.to_string(),
            syllabus_query: SYLLABUS_QUERY.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with the process environment. `.env` loading is left
    /// to the caller so tests never pick up a developer's credentials.
    pub fn from_env() -> Self {
        Self {
            model: ModelConfig::from_env(),
            ..Self::default()
        }
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.model.api_key()
    }
}

impl ModelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_string("OPENAI_API_KEY"),
            api_endpoint: normalize_endpoint(
                env_string("OPENAI_BASE_URL").unwrap_or(defaults.api_endpoint),
            ),
            chat_model: env_string("OPENAI_MODEL").unwrap_or(defaults.chat_model),
            embedding_model: env_string("OPENAI_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            temperature: defaults.temperature,
        }
    }

    pub fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(PipelineError::MissingCredential)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}
