use std::collections::HashSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::MaterialMap;

pub const AGGREGATE_FILE: &str = "study_plans.txt";
const PLAN_SUFFIX: &str = "_study_plan.txt";

/// Everything written for one student (or for the whole class in aggregate
/// mode).
#[derive(Debug, Clone)]
pub struct StudyPlanReport {
    pub student: String,
    pub weakpoints: String,
    pub materials: MaterialMap,
    pub plan: String,
}

pub fn build_report(report: &StudyPlanReport, run_id: Uuid, generated_at: DateTime<Utc>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Study Plan: {}", report.student);
    let _ = writeln!(
        output,
        "Generated {} (run {})",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        run_id
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Weak Points");
    let _ = writeln!(output, "{}", section_text(&report.weakpoints));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Course Material");
    let _ = writeln!(output, "{}", section_text(&report.materials.render()));
    let _ = writeln!(output);
    let _ = writeln!(output, "## 7-Day Plan");
    let _ = writeln!(output, "{}", section_text(&report.plan));

    output
}

fn section_text(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "No output returned."
    } else {
        trimmed
    }
}

/// `<student>_study_plan.txt`, with characters that cannot appear in a file
/// name replaced by `_`.
pub fn plan_file_name(student: &str) -> String {
    let safe: String = student
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let safe = if safe.is_empty() || safe.chars().all(|c| c == '.') {
        "student".to_string()
    } else {
        safe
    };
    format!("{safe}{PLAN_SUFFIX}")
}

/// Hands out plan file names for one run. Distinct students whose sanitised
/// names coincide, ignoring case, get `_2`, `_3`, ... suffixes so no plan
/// overwrites another.
#[derive(Debug, Default)]
pub struct PlanFileNames {
    used: HashSet<String>,
}

impl PlanFileNames {
    pub fn claim(&mut self, student: &str) -> String {
        let base = plan_file_name(student);
        let stem = base.strip_suffix(PLAN_SUFFIX).unwrap_or(&base).to_string();

        let mut candidate = base;
        let mut n = 2;
        while !self.used.insert(candidate.to_lowercase()) {
            candidate = format!("{stem}_{n}{PLAN_SUFFIX}");
            n += 1;
        }
        candidate
    }
}

pub fn write_report(path: &Path, contents: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(path.to_path_buf())
}
