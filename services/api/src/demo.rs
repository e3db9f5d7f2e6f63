use crate::infra::{build_orchestrator, EngineOrchestrator, InMemoryCompletionLedger, Simulation};
use clap::Args;
use onboarding_engine::config::{AppConfig, EngineConfig, RequirementsConfig};
use onboarding_engine::error::AppError;
use onboarding_engine::workflows::verification::{
    RequirementCatalog, SubjectId, SubjectProgress, SubjectType, TaskKind, VerificationError,
};
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Requirement profile to seed (employee or contractor)
    #[arg(long, default_value = "employee")]
    pub(crate) subject_type: String,
    /// Identifier of the simulated subject
    #[arg(long, default_value = "emp-demo-001")]
    pub(crate) subject_id: String,
    /// Kinds the simulated vendors conclude negatively (repeatable)
    #[arg(long)]
    pub(crate) fail_kind: Vec<String>,
    /// Polls each simulated check stays in flight before concluding
    #[arg(long, default_value_t = 1)]
    pub(crate) polls: u32,
    /// Upper bound on processing passes
    #[arg(long, default_value_t = 10)]
    pub(crate) max_passes: u32,
}

#[derive(Args, Debug)]
pub(crate) struct ReportArgs {
    #[command(flatten)]
    pub(crate) pipeline: DemoArgs,
    /// Write the CSV to this path instead of stdout
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

/// Outcome of driving one simulated subject to a settled state.
pub(crate) struct DemoRun {
    pub(crate) progress: SubjectProgress,
    pub(crate) passes: u32,
    pub(crate) published: bool,
}

#[derive(Debug, Serialize)]
struct TaskRow<'a> {
    subject_id: &'a str,
    kind: &'a str,
    category: &'a str,
    state: &'a str,
    result: &'a str,
    initiated_at: String,
    completed_at: String,
    retry_count: u32,
    failure: &'a str,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    println!("Onboarding verification demo");
    let run = run_pipeline(&args, &config.requirements, &config.engine).await?;

    println!(
        "- subject {} settled after {} pass(es): {} ({}% terminal)",
        run.progress.subject_id,
        run.passes,
        run.progress.status_label,
        run.progress.percent_complete
    );
    let rendered = serde_json::to_string_pretty(&run.progress)
        .map_err(|err| AppError::Report(err.to_string()))?;
    println!("{rendered}");

    if run.published {
        println!("Completion notice published to the onboarding record.");
    } else {
        println!(
            "Completion withheld: {}/{} checks passed.",
            run.progress.summary.passed, run.progress.summary.total
        );
    }
    Ok(())
}

pub(crate) async fn run_report(args: ReportArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let run = run_pipeline(&args.pipeline, &config.requirements, &config.engine).await?;

    match args.output {
        Some(path) => {
            let file = File::create(&path)?;
            write_task_csv(file, &run.progress)?;
            println!(
                "Wrote {} task row(s) for {} to {}",
                run.progress.tasks.len(),
                run.progress.subject_id,
                path.display()
            );
        }
        None => write_task_csv(io::stdout().lock(), &run.progress)?,
    }
    Ok(())
}

/// Drives one simulated subject through the engine built from `requirements`
/// and `engine`.
pub(crate) async fn run_pipeline(
    args: &DemoArgs,
    requirements: &RequirementsConfig,
    engine: &EngineConfig,
) -> Result<DemoRun, AppError> {
    let subject_type = SubjectType::parse(&args.subject_type).ok_or_else(|| {
        AppError::InvalidInput(format!("unknown subject type '{}'", args.subject_type))
    })?;
    let failing_kinds = args
        .fail_kind
        .iter()
        .map(|raw| {
            TaskKind::parse(raw)
                .ok_or_else(|| AppError::InvalidInput(format!("unknown task kind '{raw}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let catalog = RequirementCatalog::from_config(requirements)?;
    let simulation = Simulation {
        polls_before_conclusion: args.polls,
        failing_kinds,
    };
    let (orchestrator, ledger) = build_orchestrator(catalog, engine, &simulation)?;

    let subject_id = SubjectId::new(args.subject_id.clone());
    orchestrator.ensure_tasks_for_subject_type(&subject_id, subject_type)?;
    let (progress, passes) = settle(&orchestrator, &subject_id, args.max_passes.max(1)).await?;
    let published = publish_if_ready(&orchestrator, &ledger, &subject_id)?;

    Ok(DemoRun {
        progress,
        passes,
        published,
    })
}

async fn settle(
    orchestrator: &EngineOrchestrator,
    subject_id: &SubjectId,
    max_passes: u32,
) -> Result<(SubjectProgress, u32), AppError> {
    let mut passes = 0;
    loop {
        let progress = orchestrator.process_subject(subject_id).await?;
        passes += 1;
        if progress.summary.terminal == progress.summary.total || passes >= max_passes {
            return Ok((progress, passes));
        }
    }
}

fn publish_if_ready(
    orchestrator: &EngineOrchestrator,
    ledger: &InMemoryCompletionLedger,
    subject_id: &SubjectId,
) -> Result<bool, AppError> {
    match orchestrator.mark_subject_verification_complete(subject_id) {
        Ok(_) => Ok(!ledger.notices().is_empty()),
        Err(VerificationError::GateNotSatisfied { .. }) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn write_task_csv<W: io::Write>(
    writer: W,
    progress: &SubjectProgress,
) -> Result<(), AppError> {
    let mut csv = csv::Writer::from_writer(writer);
    for task in &progress.tasks {
        csv.serialize(TaskRow {
            subject_id: progress.subject_id.as_str(),
            kind: task.kind.as_str(),
            category: task.category_label,
            state: task.state_label,
            result: task.result_label,
            initiated_at: task
                .initiated_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default(),
            completed_at: task
                .completed_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default(),
            retry_count: task.retry_count,
            failure: task.failure.as_deref().unwrap_or(""),
        })
        .map_err(|err| AppError::Report(err.to_string()))?;
    }
    csv.flush()?;
    Ok(())
}
