//! End-to-end scenarios for the orchestrator against the simulated service.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use rnaseq_runner::gateway::{DirEntry, EntryType, InMemoryGateway, TaskStatus};
use rnaseq_runner::jobs::launcher::{ALIGN_SERVICE, JOB_FAILED_MARKER, TRIM_SERVICE};
use rnaseq_runner::pipeline::{PipelineConfig, RnaSeqOrchestrator};
use rnaseq_runner::sources::SourceKind;
use rnaseq_runner::{Phase, RnaJob, RnaSource};

const INPUT: &str = "/me@patricbrc.org/home/reads";
const OUT: &str = "/me@patricbrc.org/home/out";

fn config() -> PipelineConfig {
    PipelineConfig::new()
        .with_input(INPUT)
        .with_output_dir(OUT)
        .with_workspace("me@patricbrc.org")
        .with_reference_genome_id("511145.183")
        .with_wait_interval(Duration::ZERO)
        .with_max_iterations(Some(50))
}

async fn add_reads(gateway: &InMemoryGateway, files: &[&str]) {
    let entries = files
        .iter()
        .map(|name| DirEntry::new(*name, EntryType::Reads))
        .collect();
    gateway.add_entries(INPUT, entries).await;
}

async fn orchestrator(
    config: PipelineConfig,
    gateway: &Arc<InMemoryGateway>,
) -> RnaSeqOrchestrator {
    let mut orchestrator =
        RnaSeqOrchestrator::new(config, gateway.clone()).expect("valid configuration");
    orchestrator.prepare().await.expect("prepare succeeds");
    orchestrator
}

async fn services(gateway: &InMemoryGateway) -> Vec<String> {
    gateway
        .submissions()
        .await
        .into_iter()
        .map(|s| s.service)
        .collect()
}

#[tokio::test]
async fn sample_missing_second_read_is_never_active() {
    let gateway = Arc::new(InMemoryGateway::new());
    add_reads(&gateway, &["A_R1_001.fastq", "A_R2_001.fastq", "B_R1_001.fastq"]).await;

    let mut orchestrator = orchestrator(config(), &gateway).await;
    assert_eq!(orchestrator.jobs().len(), 1);
    assert!(orchestrator.job("B").is_none());

    orchestrator.run().await.unwrap();
    let submissions = gateway.submissions().await;
    assert!(submissions
        .iter()
        .all(|s| s.params["output_file"].as_str().is_some_and(|f| f.starts_with("A_"))));
}

#[tokio::test]
async fn single_sample_reaches_done() {
    let gateway = Arc::new(InMemoryGateway::new());
    add_reads(&gateway, &["A_R1_001.fastq", "A_R2_001.fastq", "B_R1_001.fastq"]).await;
    let config = config().with_max_concurrent_tasks(1).with_max_retries(2);

    let mut orchestrator = orchestrator(config, &gateway).await;
    let summary = orchestrator.run().await.unwrap();

    let job = orchestrator.job("A").unwrap();
    assert_eq!(job.phase(), Phase::Done);
    assert!(!job.is_failed());
    assert!(job.task_id().is_none());
    assert_eq!(summary.done, 1);
    assert!(summary.is_complete());

    assert_eq!(services(&gateway).await, vec![TRIM_SERVICE, ALIGN_SERVICE]);
    let align = &gateway.submissions().await[1];
    assert_eq!(
        align.params["paired_end_libs"][0]["read1"],
        format!("{}/.A_fq/A_fq_R1_ptrim.fq.gz", OUT)
    );
    assert_eq!(align.params["reference_genome_id"], "511145.183");

    assert!(gateway.exists(&format!("{}/FPKM/A_genes.fpkm", OUT)).await);
    assert!(gateway.exists(&format!("{}/FPKM/A.samstat.html", OUT)).await);
}

#[tokio::test]
async fn align_failing_past_retry_budget_fails_job() {
    let gateway = Arc::new(InMemoryGateway::new());
    add_reads(&gateway, &["A_R1_001.fastq", "A_R2_001.fastq"]).await;
    gateway
        .script_outcomes(
            "A_rna",
            vec![TaskStatus::Failed, TaskStatus::Failed, TaskStatus::Failed],
        )
        .await;

    let mut orchestrator = orchestrator(config().with_max_retries(2), &gateway).await;
    let summary = orchestrator.run().await.unwrap();

    let job = orchestrator.job("A").unwrap();
    assert_eq!(job.phase(), Phase::Done);
    assert!(job.is_failed());
    assert!(job.task_id().is_none());
    assert_eq!(job.retry_count(), 2);
    assert_eq!(summary.failed, vec!["A".to_string()]);

    let aligns = services(&gateway)
        .await
        .into_iter()
        .filter(|s| s == ALIGN_SERVICE)
        .count();
    assert_eq!(aligns, 3);
    assert!(gateway.copies().await.is_empty());
}

#[tokio::test]
async fn failure_at_last_retry_is_not_retried_again() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway
        .script_outcomes("A_fq", vec![TaskStatus::Failed, TaskStatus::Failed])
        .await;
    let max_retries = 3;
    let mut orchestrator =
        RnaSeqOrchestrator::new(config().with_max_retries(max_retries), gateway.clone()).unwrap();
    let mut job = RnaJob::new("A", OUT, "511145.183");
    job.set_source(RnaSource::accession("SRR0000001"));
    for _ in 0..max_retries - 1 {
        job.record_failure();
    }
    orchestrator.insert_job(job);

    // Submit, observe the first failure (uses the last retry), observe the second.
    orchestrator.run_cycle().await.unwrap();
    orchestrator.run_cycle().await.unwrap();
    assert_eq!(orchestrator.job("A").unwrap().retry_count(), max_retries);
    assert!(!orchestrator.job("A").unwrap().is_failed());

    orchestrator.run_cycle().await.unwrap();
    let job = orchestrator.job("A").unwrap();
    assert!(job.is_failed());
    assert!(job.is_done());
    assert_eq!(gateway.submissions().await.len(), 2);
}

#[tokio::test]
async fn concurrency_cap_is_never_exceeded() {
    let gateway = Arc::new(InMemoryGateway::with_task_duration(2));
    let files: Vec<String> = ["A", "B", "C", "D", "E", "F"]
        .iter()
        .flat_map(|s| [format!("{}_R1_001.fastq", s), format!("{}_R2_001.fastq", s)])
        .collect();
    let names: Vec<&str> = files.iter().map(String::as_str).collect();
    add_reads(&gateway, &names).await;
    gateway
        .script_outcomes("C_fq", vec![TaskStatus::Failed])
        .await;

    let mut orchestrator = orchestrator(
        config().with_max_concurrent_tasks(2).with_max_iterations(None),
        &gateway,
    )
    .await;
    let mut peak_tracked = 0;
    while orchestrator.incomplete_count() > 0 {
        let report = orchestrator.run_cycle().await.unwrap();
        assert!(report.active <= 2);
        peak_tracked = peak_tracked.max(report.active);
    }

    assert_eq!(peak_tracked, 2);
    assert!(gateway.peak_running().await <= 2);
    assert!(orchestrator
        .jobs()
        .values()
        .all(|job| job.is_done() && !job.is_failed()));
    assert_eq!(orchestrator.job("C").unwrap().retry_count(), 1);
}

#[tokio::test]
async fn existing_trim_result_resumes_at_align() {
    let gateway = Arc::new(InMemoryGateway::new());
    add_reads(&gateway, &["X_R1_001.fastq", "X_R2_001.fastq"]).await;
    gateway
        .add_entries(OUT, vec![DirEntry::new("X_fq", EntryType::JobResult)])
        .await;
    gateway
        .add_entries(
            &format!("{}/.X_fq", OUT),
            vec![
                DirEntry::new("X_fq_R1_ptrim.fq.gz", EntryType::Reads),
                DirEntry::new("X_fq_R2_ptrim.fq.gz", EntryType::Reads),
            ],
        )
        .await;

    let mut orchestrator = orchestrator(config(), &gateway).await;
    assert_eq!(orchestrator.job("X").unwrap().phase(), Phase::Align);
    assert!(gateway.submissions().await.is_empty());

    orchestrator.run().await.unwrap();
    assert_eq!(services(&gateway).await, vec![ALIGN_SERVICE]);
    assert!(orchestrator.job("X").unwrap().is_done());
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let gateway = Arc::new(InMemoryGateway::new());
    add_reads(&gateway, &["X_R1_001.fastq", "X_R2_001.fastq"]).await;
    gateway
        .add_entries(OUT, vec![DirEntry::new("X_fq", EntryType::JobResult)])
        .await;

    let mut orchestrator = orchestrator(config(), &gateway).await;
    orchestrator.reconcile().await.unwrap();
    assert_eq!(orchestrator.job("X").unwrap().phase(), Phase::Align);

    let mut job = orchestrator.job("X").unwrap().clone();
    assert!(!job.merge_state(Phase::Trim));
    assert_eq!(job.phase(), Phase::Align);
}

#[tokio::test]
async fn restart_attaches_running_tasks_instead_of_resubmitting() {
    let gateway = Arc::new(InMemoryGateway::with_task_duration(3));
    add_reads(&gateway, &["A_R1_001.fastq", "A_R2_001.fastq"]).await;

    let mut first = orchestrator(config().with_max_iterations(Some(1)), &gateway).await;
    first.run().await.unwrap();
    let task_id = first.job("A").unwrap().task_id().unwrap().to_string();
    drop(first);

    let mut second = orchestrator(config(), &gateway).await;
    assert_eq!(second.job("A").unwrap().task_id(), Some(task_id.as_str()));

    second.run().await.unwrap();
    assert_eq!(services(&gateway).await, vec![TRIM_SERVICE, ALIGN_SERVICE]);
    assert!(second.job("A").unwrap().is_done());
}

#[tokio::test]
async fn failed_result_folder_counts_against_retries() {
    let gateway = Arc::new(InMemoryGateway::new());
    add_reads(&gateway, &["A_R1_001.fastq", "A_R2_001.fastq"]).await;
    gateway
        .add_entries(OUT, vec![DirEntry::new("A_fq", EntryType::JobResult)])
        .await;
    gateway
        .add_entries(
            &format!("{}/.A_fq", OUT),
            vec![DirEntry::new(JOB_FAILED_MARKER, EntryType::Text)],
        )
        .await;
    gateway
        .script_outcomes("A_fq", vec![TaskStatus::Failed])
        .await;

    let mut orchestrator = orchestrator(config().with_max_retries(1), &gateway).await;
    let job = orchestrator.job("A").unwrap();
    assert_eq!(job.phase(), Phase::Trim);
    assert_eq!(job.retry_count(), 1);

    orchestrator.run().await.unwrap();
    let job = orchestrator.job("A").unwrap();
    assert!(job.is_failed());
    assert_eq!(gateway.submissions().await.len(), 1);
}

#[tokio::test]
async fn missing_alignment_artifacts_close_job_without_failure() {
    let gateway = Arc::new(InMemoryGateway::new());
    add_reads(&gateway, &["A_R1_001.fastq", "A_R2_001.fastq"]).await;
    gateway
        .add_entries(OUT, vec![DirEntry::new("A_rna", EntryType::JobResult)])
        .await;
    gateway.add_dir(&format!("{}/.A_rna", OUT)).await;

    let mut orchestrator = orchestrator(config(), &gateway).await;
    assert_eq!(orchestrator.job("A").unwrap().phase(), Phase::Copy);

    orchestrator.run().await.unwrap();
    let job = orchestrator.job("A").unwrap();
    assert!(job.is_done());
    assert!(!job.is_failed());
    assert!(gateway.copies().await.is_empty());
    assert!(gateway.submissions().await.is_empty());
}

#[tokio::test]
async fn accession_manifest_runs_to_completion() {
    let mut manifest = tempfile::NamedTempFile::new().unwrap();
    writeln!(manifest, "sample\tnotes").unwrap();
    writeln!(manifest, "SRR100\tfirst").unwrap();
    writeln!(manifest, "SRR200").unwrap();
    writeln!(manifest, "SRR100\tduplicate").unwrap();
    manifest.flush().unwrap();

    let gateway = Arc::new(InMemoryGateway::new());
    let config = config()
        .with_source_kind(SourceKind::AccessionFile)
        .with_input(manifest.path().to_string_lossy().into_owned());

    let mut orchestrator = orchestrator(config, &gateway).await;
    assert_eq!(orchestrator.jobs().len(), 2);

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.done, 2);

    let trims: Vec<_> = gateway
        .submissions()
        .await
        .into_iter()
        .filter(|s| s.service == TRIM_SERVICE)
        .collect();
    assert_eq!(trims.len(), 2);
    assert_eq!(trims[0].params["srr_ids"][0], "SRR100");
}

#[tokio::test]
async fn already_copied_results_are_done_at_startup() {
    let gateway = Arc::new(InMemoryGateway::new());
    add_reads(&gateway, &["A_R1_001.fastq", "A_R2_001.fastq"]).await;
    gateway
        .add_entries(
            &format!("{}/FPKM", OUT),
            vec![
                DirEntry::new("A_genes.fpkm", EntryType::Text),
                DirEntry::new("A.samstat.html", EntryType::Other),
            ],
        )
        .await;

    let mut orchestrator = orchestrator(config(), &gateway).await;
    assert!(orchestrator.job("A").unwrap().is_done());

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.iterations, 0);
    assert!(gateway.submissions().await.is_empty());
}
