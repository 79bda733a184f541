use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::models::Passage;

const PAGE_BREAK: char = '\u{000C}';

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub path: PathBuf,
    pub pages: Vec<String>,
}

/// Loads every configured document that exists. Missing files are skipped
/// with a warning; an empty result is an error.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    let mut documents = Vec::new();

    for path in paths {
        if !path.is_file() {
            warn!(path = %path.display(), "source document not found, skipping");
            continue;
        }

        let document = SourceDocument {
            name: source_name(path),
            path: path.clone(),
            pages: extract_pages(path)?,
        };
        info!(
            source = %document.name,
            path = %document.path.display(),
            pages = document.pages.len(),
            "loaded source document"
        );
        documents.push(document);
    }

    if documents.is_empty() {
        return Err(PipelineError::NoDocumentsLoaded);
    }

    Ok(documents)
}

/// Page texts in page order. PDFs are extracted page by page; other files are
/// read as UTF-8 and split on form feeds.
fn extract_pages(path: &Path) -> Result<Vec<String>> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        let pages = pdf_extract::extract_text_by_pages(path).map_err(|e| {
            PipelineError::Document {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        Ok(pages.iter().map(|page| page.trim().to_string()).collect())
    } else {
        Ok(split_pages(&std::fs::read_to_string(path)?))
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Splits plain text on form feeds. Blank pages are kept so later page
/// numbers stay aligned with the source.
pub fn split_pages(text: &str) -> Vec<String> {
    text.split(PAGE_BREAK)
        .map(|page| page.trim().to_string())
        .collect()
}

pub fn split_documents(
    documents: &[SourceDocument],
    chunk_size: usize,
    overlap: usize,
) -> Vec<Passage> {
    let mut passages = Vec::new();

    for document in documents {
        for (idx, page) in document.pages.iter().enumerate() {
            for content in split_text(page, chunk_size, overlap) {
                passages.push(Passage {
                    source_name: document.name.clone(),
                    page: Some(idx as u32 + 1),
                    content,
                });
            }
        }
    }

    passages
}

/// Windows of at most `chunk_size` characters. Each window starts at the first
/// word boundary within `overlap` characters before the previous one ended, and
/// ends on whitespace when the window contains any.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());
        if end < chars.len() {
            if let Some(pos) = chars[start..end].iter().rposition(|c| c.is_whitespace()) {
                if pos > 0 {
                    end = start + pos;
                }
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= chars.len() {
            break;
        }
        let mut next = end.saturating_sub(overlap);
        while next > 0 && next < end && !chars[next - 1].is_whitespace() {
            next += 1;
        }
        start = if next > start { next } else { end };
    }

    chunks
}
