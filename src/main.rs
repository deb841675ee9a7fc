use cdr_core::{
    max_template_depth_from_env_value, metadata_value_from_str, render_timeout_from_env_value,
    MetadataFormat, PipelineError, PipelineResult, RenderConfig, RenderPipeline,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Settings for one batch run, read from the environment.
#[derive(Debug, Clone)]
struct RunnerSettings {
    document_dir: PathBuf,
    output_dir: PathBuf,
    metadata_file: PathBuf,
    workers: usize,
    timeout: Duration,
    config: RenderConfig,
}

impl RunnerSettings {
    fn from_env() -> anyhow::Result<Self> {
        let document_dir =
            std::env::var("CDR_DOCUMENT_DIR").unwrap_or_else(|_| "documents".into());
        let output_dir = std::env::var("CDR_OUTPUT_DIR").unwrap_or_else(|_| "rendered".into());
        let metadata_file =
            std::env::var("CDR_METADATA_FILE").unwrap_or_else(|_| "metadata.json".into());
        let depth = max_template_depth_from_env_value(std::env::var("CDR_MAX_TEMPLATE_DEPTH").ok())?;

        Ok(Self {
            document_dir: document_dir.into(),
            output_dir: output_dir.into(),
            metadata_file: metadata_file.into(),
            workers: workers_from_env_value(std::env::var("CDR_WORKERS").ok())?,
            timeout: render_timeout_from_env_value(std::env::var("CDR_RENDER_TIMEOUT_MS").ok())?,
            config: RenderConfig::new(depth, true)?,
        })
    }
}

/// Parse the worker count, defaulting to the available parallelism.
fn workers_from_env_value(value: Option<String>) -> anyhow::Result<usize> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) => {
            let workers: usize = v
                .parse()
                .map_err(|_| anyhow::anyhow!("CDR_WORKERS is not a valid number: {:?}", v))?;
            anyhow::ensure!(workers > 0, "CDR_WORKERS must be greater than zero");
            Ok(workers)
        }
        None => Ok(std::thread::available_parallelism().map_or(1, |n| n.get())),
    }
}

/// What happened to one document.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
enum DocumentOutcome {
    Rendered {
        document: String,
        output: String,
    },
    Failed {
        document: String,
        stage: String,
        message: String,
        advice: String,
    },
}

impl DocumentOutcome {
    fn failed(document: &Path, error: &PipelineError) -> Self {
        DocumentOutcome::Failed {
            document: document.display().to_string(),
            stage: error.stage().to_string(),
            message: error.to_string(),
            advice: error.user_message().to_string(),
        }
    }

    fn unreadable(document: &Path, stage: &str, error: &std::io::Error) -> Self {
        DocumentOutcome::Failed {
            document: document.display().to_string(),
            stage: stage.to_string(),
            message: error.to_string(),
            advice: cdr_core::INTERNAL_FAILURE_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchReport {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    rendered: usize,
    failed: usize,
    outcomes: Vec<DocumentOutcome>,
}

/// Every `*.xml` file directly inside `dir`, sorted by path.
fn list_documents(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut documents = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_xml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if path.is_file() && is_xml {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

/// Runs `job` on the blocking pool. A job still running at `timeout` is reported as
/// cancelled; its thread is left to finish on its own.
async fn render_with_deadline<F>(timeout: Duration, job: F) -> PipelineResult<String>
where
    F: FnOnce() -> PipelineResult<String> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(job)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!("Render worker failed: {:?}", e);
            Err(PipelineError::Cancelled)
        }
        Err(_) => Err(PipelineError::Cancelled),
    }
}

async fn render_document(
    pipeline: Arc<RenderPipeline>,
    metadata: Arc<serde_json::Value>,
    document: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
) -> DocumentOutcome {
    let payload = match std::fs::read_to_string(&document) {
        Ok(payload) => payload,
        Err(e) => return DocumentOutcome::unreadable(&document, "read", &e),
    };

    let result =
        render_with_deadline(timeout, move || pipeline.render(&payload, &metadata)).await;
    let html = match result {
        Ok(html) => html,
        Err(e) => {
            tracing::warn!("{} failed at {}: {}", document.display(), e.stage(), e);
            return DocumentOutcome::failed(&document, &e);
        }
    };

    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    let output = output_dir.join(format!("{stem}.html"));
    if let Err(e) = std::fs::write(&output, html) {
        return DocumentOutcome::unreadable(&document, "write", &e);
    }
    DocumentOutcome::Rendered {
        document: document.display().to_string(),
        output: output.display().to_string(),
    }
}

/// Renders every document with at most `workers` renders in flight.
async fn run_batch(
    pipeline: Arc<RenderPipeline>,
    metadata: Arc<serde_json::Value>,
    documents: Vec<PathBuf>,
    output_dir: &Path,
    workers: usize,
    timeout: Duration,
) -> anyhow::Result<BatchReport> {
    let started_at = Utc::now();
    let semaphore = Arc::new(Semaphore::new(workers));

    let mut handles = Vec::with_capacity(documents.len());
    for document in documents {
        let permit = semaphore.clone().acquire_owned().await?;
        let pipeline = pipeline.clone();
        let metadata = metadata.clone();
        let output_dir = output_dir.to_path_buf();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            render_document(pipeline, metadata, document, output_dir, timeout).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await?);
    }

    let rendered = outcomes
        .iter()
        .filter(|o| matches!(o, DocumentOutcome::Rendered { .. }))
        .count();
    Ok(BatchReport {
        started_at,
        finished_at: Utc::now(),
        rendered,
        failed: outcomes.len() - rendered,
        outcomes,
    })
}

/// Batch renderer for clinical documents
///
/// Renders every `*.xml` document in a directory against one metadata descriptor and writes
/// one HTML file per document plus a `report.json` summary.
///
/// # Environment Variables
/// - `CDR_DOCUMENT_DIR`: Directory holding the documents (default: "documents")
/// - `CDR_OUTPUT_DIR`: Directory for HTML output and the report (default: "rendered")
/// - `CDR_METADATA_FILE`: Metadata descriptor, JSON or YAML (default: "metadata.json")
/// - `CDR_WORKERS`: Concurrent renders (default: available parallelism)
/// - `CDR_RENDER_TIMEOUT_MS`: Per-document deadline (default: 10000)
/// - `CDR_MAX_TEMPLATE_DEPTH`: Rule nesting limit (default: 64)
///
/// # Returns
/// * `Ok(())` - If the batch ran, whether or not individual documents failed
/// * `Err(anyhow::Error)` - If settings, metadata or directories could not be used
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cdr=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = RunnerSettings::from_env()?;
    let metadata_text = std::fs::read_to_string(&settings.metadata_file)?;
    let metadata = metadata_value_from_str(
        &metadata_text,
        MetadataFormat::from_path(&settings.metadata_file),
    )?;
    let documents = list_documents(&settings.document_dir)?;
    std::fs::create_dir_all(&settings.output_dir)?;

    tracing::info!(
        "++ Rendering {} documents from {} with {} workers",
        documents.len(),
        settings.document_dir.display(),
        settings.workers
    );

    let report = run_batch(
        Arc::new(RenderPipeline::new(settings.config.clone())),
        Arc::new(metadata),
        documents,
        &settings.output_dir,
        settings.workers,
        settings.timeout,
    )
    .await?;

    let report_path = settings.output_dir.join("report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
    tracing::info!(
        "-- Rendered {}, failed {}; report at {}",
        report.rendered,
        report.failed,
        report_path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOCUMENT: &str = include_str!("../crates/core/fixtures/sample_document.xml");
    const METADATA: &str = include_str!("../crates/core/fixtures/sample_metadata.json");

    #[test]
    fn test_workers_from_env_value() {
        assert_eq!(workers_from_env_value(Some(" 3 ".into())).unwrap(), 3);
        assert!(workers_from_env_value(None).unwrap() >= 1);
        assert!(workers_from_env_value(Some("0".into())).is_err());
        assert!(workers_from_env_value(Some("many".into())).is_err());
    }

    #[test]
    fn test_list_documents_keeps_xml_files_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.xml"), DOCUMENT).unwrap();
        std::fs::write(dir.path().join("a.XML"), DOCUMENT).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested.xml")).unwrap();

        let documents = list_documents(dir.path()).unwrap();
        let names: Vec<_> = documents
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.XML", "b.xml"]);
    }

    #[tokio::test]
    async fn test_run_batch_renders_and_reports_failures() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("good.xml"), DOCUMENT).unwrap();
        std::fs::write(input.path().join("broken.xml"), "<ClinicalDocument>").unwrap();

        let metadata: serde_json::Value = serde_json::from_str(METADATA).unwrap();
        let report = run_batch(
            Arc::new(RenderPipeline::default()),
            Arc::new(metadata),
            list_documents(input.path()).unwrap(),
            output.path(),
            2,
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert_eq!(report.rendered, 1);
        assert_eq!(report.failed, 1);
        assert!(report.finished_at >= report.started_at);
        assert!(matches!(
            &report.outcomes[0],
            DocumentOutcome::Failed { stage, .. } if stage == "parse-document"
        ));
        let html = std::fs::read_to_string(output.path().join("good.html")).unwrap();
        assert!(html.contains("Informe de consulta externa"));
    }

    #[tokio::test]
    async fn test_deadline_reports_cancelled() {
        let result = render_with_deadline(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(String::new())
        })
        .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn test_outcome_serialises_with_status_tag() {
        let outcome = DocumentOutcome::Rendered {
            document: "a.xml".into(),
            output: "a.html".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "rendered");
        assert_eq!(json["output"], "a.html");
    }
}
