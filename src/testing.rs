use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::openai::{CompletionModel, Embedder};

const DIMENSION: usize = 64;

/// Bag-of-words embedder: each lowercase word bumps one hashed dimension.
#[derive(Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() as usize) % DIMENSION] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|text| Self::vector(text)).collect())
    }
}

/// Answers each agent prompt with canned text containing escaped newlines and
/// records every prompt it sees.
#[derive(Default)]
pub struct ScriptedModel {
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let reply = if prompt.contains("Agent Weakpoint Detector") {
            "1. LEFT JOIN semantics\\n2. GROUP BY with aggregates"
        } else if prompt.contains("Agent Vector Searcher") {
            r#"```json
[{"weak_point": "LEFT JOIN semantics", "location": "Syllabus.txt, page 1"}]
```"#
        } else {
            "Monday: joins drill\\nTuesday: aggregates review"
        };
        Ok(reply.to_string())
    }
}
