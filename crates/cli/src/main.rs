use cdr_core::{
    assemble, max_template_depth_from_env_value, metadata_value_from_str, validated_descriptor,
    MetadataFormat, RenderConfig, RenderPipeline, RenderRequest,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Payload used when only the metadata is being checked.
const PLACEHOLDER_DOCUMENT: &str = "<ClinicalDocument xmlns=\"urn:hl7-org:v3\"/>";

#[derive(Parser)]
#[command(name = "cdr")]
#[command(about = "Clinical document report renderer CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a clinical document to HTML
    Render {
        /// Clinical document (XML)
        #[arg(long)]
        document: PathBuf,
        /// Metadata descriptor (JSON or YAML)
        #[arg(long)]
        metadata: PathBuf,
        /// Write the HTML here instead of standard output
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the rule set assembled for a metadata descriptor
    Rules {
        /// Metadata descriptor (JSON or YAML)
        #[arg(long)]
        metadata: PathBuf,
    },
    /// Validate a metadata descriptor
    Check {
        /// Metadata descriptor (JSON or YAML)
        #[arg(long)]
        metadata: PathBuf,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn load_metadata(path: &Path) -> CliResult<serde_json::Value> {
    let text = std::fs::read_to_string(path)?;
    Ok(metadata_value_from_str(&text, MetadataFormat::from_path(path))?)
}

fn render(config: RenderConfig, document: &Path, metadata: &Path) -> CliResult<String> {
    let payload = std::fs::read_to_string(document)?;
    let metadata = load_metadata(metadata)?;
    let pipeline = RenderPipeline::new(config);
    pipeline.render(&payload, &metadata).map_err(|e| {
        tracing::error!("{} failed at {}: {}", document.display(), e.stage(), e);
        eprintln!("{}", e.user_message());
        let message: Box<dyn std::error::Error> = format!("[{}] {}", e.stage(), e).into();
        message
    })
}

fn rules(metadata: &Path) -> CliResult<String> {
    let metadata = load_metadata(metadata)?;
    let request = RenderRequest::new(PLACEHOLDER_DOCUMENT, &metadata);
    let descriptor = validated_descriptor(Some(&request))?;
    Ok(assemble(&descriptor)?.into_string())
}

fn check(metadata: &Path) -> CliResult<String> {
    let metadata = load_metadata(metadata)?;
    let request = RenderRequest::new(PLACEHOLDER_DOCUMENT, &metadata);
    let descriptor = validated_descriptor(Some(&request))?;
    let sections: Vec<&str> = descriptor
        .configured_sections()
        .iter()
        .map(|kind| kind.key())
        .collect();
    Ok(if sections.is_empty() {
        "Metadata is valid (no specialised sections).".to_string()
    } else {
        format!("Metadata is valid (sections: {}).", sections.join(", "))
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cdr=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Render {
            document,
            metadata,
            output,
        }) => {
            let depth =
                max_template_depth_from_env_value(std::env::var("CDR_MAX_TEMPLATE_DEPTH").ok())?;
            let config = RenderConfig::new(depth, true)?;
            let html = render(config, &document, &metadata)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, html)?;
                    println!("Wrote {}", path.display());
                }
                None => println!("{}", html),
            }
        }
        Some(Commands::Rules { metadata }) => match rules(&metadata) {
            Ok(rule_set) => println!("{}", rule_set),
            Err(e) => tracing::error!("Error assembling rule set: {}", e),
        },
        Some(Commands::Check { metadata }) => match check(&metadata) {
            Ok(summary) => println!("{}", summary),
            Err(e) => tracing::error!("Invalid metadata: {}", e),
        },
        None => {
            println!("Use 'cdr --help' for commands");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const METADATA: &str = r#"{
        "namespaces": {
            "n1": "urn:hl7-org:v3",
            "n2": "urn:hl7-org:v3/meta/voc",
            "ds": "http://www.w3.org/2000/09/xmldsig#",
            "xsi": "http://www.w3.org/2001/XMLSchema-instance"
        },
        "templateIdentifiers": {"documentTemplate": "2.16.840.1.113883.10.20.22.1.1"},
        "sectionCodes": {"diagnoses": "11450-4"},
        "codeSystems": {"loinc": "2.16.840.1.113883.6.1", "snomed": "2.16.840.1.113883.6.96"}
    }"#;

    const METADATA_YAML: &str = "\
namespaces:
  n1: urn:hl7-org:v3
  n2: urn:hl7-org:v3/meta/voc
  ds: \"http://www.w3.org/2000/09/xmldsig#\"
  xsi: http://www.w3.org/2001/XMLSchema-instance
templateIdentifiers:
  documentTemplate: 2.16.840.1.113883.10.20.22.1.1
codeSystems:
  loinc: 2.16.840.1.113883.6.1
  snomed: 2.16.840.1.113883.6.96
";

    const DOCUMENT: &str = r#"<ClinicalDocument xmlns="urn:hl7-org:v3">
<templateId root="2.16.840.1.113883.10.20.22.1.1"/>
<id extension="1" root="2.16.724"/>
<title>Alta</title>
<effectiveTime value="20200101"/>
<component><structuredBody>
<component><section><code code="11450-4"/><title>Problemas</title></section></component>
</structuredBody></component>
</ClinicalDocument>"#;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_render_reads_files_and_returns_html() {
        let dir = TempDir::new().unwrap();
        let document = write(&dir, "doc.xml", DOCUMENT);
        let metadata = write(&dir, "metadata.json", METADATA);

        let html = render(RenderConfig::default(), &document, &metadata).unwrap();
        assert!(html.contains("<h1 class=\"document-title\">Alta</h1>"));
        assert!(html.contains("section-diagnoses"));
    }

    #[test]
    fn test_render_reports_stage_on_failure() {
        let dir = TempDir::new().unwrap();
        let document = write(&dir, "doc.xml", "<ClinicalDocument>");
        let metadata = write(&dir, "metadata.json", METADATA);

        let err = render(RenderConfig::default(), &document, &metadata).unwrap_err();
        assert!(err.to_string().starts_with("[parse-document]"));
    }

    #[test]
    fn test_rules_prints_assembled_rule_set() {
        let dir = TempDir::new().unwrap();
        let metadata = write(&dir, "metadata.json", METADATA);

        let rule_set = rules(&metadata).unwrap();
        assert!(rule_set.contains("xmlns:n1=\"urn:hl7-org:v3\""));
        assert!(!rule_set.contains("{{"));
    }

    #[test]
    fn test_check_accepts_yaml_metadata() {
        let dir = TempDir::new().unwrap();
        let metadata = write(&dir, "metadata.yaml", METADATA_YAML);

        let summary = check(&metadata).unwrap();
        assert_eq!(summary, "Metadata is valid (no specialised sections).");
    }

    #[test]
    fn test_check_rejects_incomplete_metadata() {
        let dir = TempDir::new().unwrap();
        let metadata = write(&dir, "metadata.json", r#"{"namespaces": {}}"#);

        let err = check(&metadata).unwrap_err();
        assert!(err.to_string().contains("templateIdentifiers"));
    }
}
