use std::fmt::Write;
use std::path::PathBuf;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::agents::{self, AgentContext};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::StudentFeedback;
use crate::openai::CompletionModel;
use crate::report::{self, PlanFileNames, StudyPlanReport};
use crate::store::Retriever;

/// Runs weak point detection, material lookup and planning in sequence and
/// writes the results. Every run gets a fresh id stamped into its files.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    ctx: AgentContext<'a>,
    run_id: Uuid,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        retriever: &'a dyn Retriever,
        model: &'a dyn CompletionModel,
    ) -> Self {
        Self {
            config,
            ctx: AgentContext {
                retriever,
                model,
                retrieval: &config.retrieval,
            },
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// One plan file per student, students in the order given. File names are
    /// unique within the run. The first failure aborts the run.
    pub async fn run_per_student(&self, students: &[StudentFeedback]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(students.len());
        let mut names = PlanFileNames::default();

        for student in students {
            info!(student = %student.student, "generating study plan");
            let plan = self.plan_for(&student.student, &student.joined_text()).await?;
            let path = self.config.output_dir.join(names.claim(&student.student));
            written.push(self.write(&plan, path)?);
        }

        Ok(written)
    }

    /// A single pass over the whole class, written to one combined file.
    pub async fn run_aggregate(&self, students: &[StudentFeedback]) -> Result<PathBuf> {
        info!(students = students.len(), "generating combined study plan");
        let plan = self
            .plan_for("all students", &aggregate_feedback(students))
            .await?;
        let path = self.config.output_dir.join(report::AGGREGATE_FILE);
        self.write(&plan, path)
    }

    async fn plan_for(&self, label: &str, feedback: &str) -> Result<StudyPlanReport> {
        let weakpoints = agents::detect_weakpoints(&self.ctx, feedback).await?;
        let materials = agents::locate_material(&self.ctx, &weakpoints).await?;
        let plan = agents::create_study_plan(&self.ctx, &weakpoints, &materials).await?;

        Ok(StudyPlanReport {
            student: label.to_string(),
            weakpoints,
            materials,
            plan,
        })
    }

    fn write(&self, plan: &StudyPlanReport, path: PathBuf) -> Result<PathBuf> {
        let contents = report::build_report(plan, self.run_id, Utc::now());
        let path = report::write_report(&path, &contents)?;
        info!(path = %path.display(), "saved study plan");
        Ok(path)
    }
}

fn aggregate_feedback(students: &[StudentFeedback]) -> String {
    let mut output = String::new();
    for student in students {
        let _ = writeln!(output, "{}:", student.student);
        for line in student.joined_text().lines() {
            let _ = writeln!(output, "- {line}");
        }
        let _ = writeln!(output);
    }
    output.trim_end().to_string()
}
