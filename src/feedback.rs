use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::config::ColumnConfig;
use crate::error::{PipelineError, Result};
use crate::models::{FeedbackRow, StudentFeedback};

/// Reads feedback rows from a delimited file. Headers are trimmed before the
/// required columns are looked up, so `"Feedback "` matches `Feedback`.
pub fn load_feedback(path: &Path, columns: &ColumnConfig) -> Result<Vec<FeedbackRow>> {
    if !path.is_file() {
        return Err(PipelineError::DataFileMissing(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    let student_idx = column_index(&headers, &columns.student)?;
    let feedback_idx = column_index(&headers, &columns.feedback)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let student = record.get(student_idx).unwrap_or_default().trim();
        if student.is_empty() {
            debug!(line = ?record.position().map(|p| p.line()), "skipping row without a student id");
            continue;
        }

        rows.push(FeedbackRow {
            student: student.to_string(),
            feedback: record.get(feedback_idx).unwrap_or_default().to_string(),
        });
    }

    Ok(rows)
}

fn column_index(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header == name.trim())
        .ok_or_else(|| PipelineError::MissingColumn(name.trim().to_string()))
}

/// Groups rows by student id. Students come out in ascending id order and each
/// student's rows keep file order; blank feedback is kept so no student is lost.
pub fn group_by_student(rows: Vec<FeedbackRow>) -> Vec<StudentFeedback> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for row in rows {
        groups.entry(row.student).or_default().push(row.feedback);
    }

    groups
        .into_iter()
        .map(|(student, feedback)| StudentFeedback { student, feedback })
        .collect()
}
