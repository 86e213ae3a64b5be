/// `confgraph run` command implementation
///
/// Loads a pipeline document, resolves it with the built-in targets and
/// prints the result as JSON.
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use confgraph::builtins;
use confgraph::config_discovery::load_config_with_discovery;
use confgraph::logging;
use confgraph::persistence::PersistenceController;
use confgraph::pipeline::ConfigNode;
use confgraph::PipelineError;

use crate::cli::RunArgs;
use crate::cli_utils::{confgraph_prefix, run_summary};
use crate::merger::MergedRunConfig;

pub fn run(args: &RunArgs) -> Result<()> {
    let file_config = load_config_with_discovery(args.config.as_deref())?;
    let config_path = file_config.as_ref().map(|(path, _)| path.clone());
    let merged = MergedRunConfig::merge(args, file_config.map(|(_, config)| config))?;

    logging::init(&merged.log_level);
    match &config_path {
        Some(path) => info!("Using config: {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    let document = load_document(&args.pipeline)?;
    let root_json = match &args.pointer {
        Some(pointer) => document.pointer(pointer).with_context(|| {
            format!(
                "JSON pointer {} does not match anything in {}",
                pointer,
                args.pipeline.display()
            )
        })?,
        None => &document,
    };
    let root = ConfigNode::from_json(root_json)
        .with_context(|| format!("Invalid pipeline document: {}", args.pipeline.display()))?;

    if root.count_invocables() == 0 {
        warn!("pipeline contains no {} nodes", confgraph::pipeline::node::KEY_TARGET);
    }

    let registry = builtins::registry()?;
    let controller = PersistenceController::new(merged.persistence);

    let outcome = controller.execute(&root, &registry).map_err(|err| {
        let message = failure_message(&args.pipeline, &err);
        anyhow::Error::new(err).context(message)
    })?;

    let json = outcome
        .value
        .to_json()
        .context("Pipeline result cannot be rendered as JSON")?;
    let rendered = serde_json::to_string_pretty(&json)?;

    match &args.output {
        Some(path) => {
            fs::write(path, format!("{}\n", rendered))
                .with_context(|| format!("Failed to write result to {}", path.display()))?;
            eprintln!("{} Result written to {}", confgraph_prefix(), path.display());
        }
        None => println!("{}", rendered),
    }

    eprintln!("{}", run_summary(&outcome.stats, outcome.flush.as_ref()));
    Ok(())
}

fn failure_message(pipeline: &Path, err: &PipelineError) -> String {
    match err.target() {
        Some(target) => format!("Pipeline {} failed in target {}", pipeline.display(), target),
        None => format!("Pipeline {} failed", pipeline.display()),
    }
}

/// Parse a pipeline document; `.toml` files are TOML, everything else JSON
fn load_document(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline: {}", path.display()))?;

    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

    if is_toml {
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse TOML pipeline: {}", path.display()))
    } else {
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON pipeline: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_document_by_extension() {
        let temp = TempDir::new().unwrap();

        let json_path = temp.path().join("p.json");
        fs::write(&json_path, r#"{"a": {"_target_": "t", "x": 1}}"#).unwrap();
        let json = load_document(&json_path).unwrap();
        assert_eq!(json["a"]["x"], 1);

        let toml_path = temp.path().join("p.toml");
        fs::write(&toml_path, "[a]\n_target_ = \"t\"\nx = 1\n").unwrap();
        let toml = load_document(&toml_path).unwrap();
        assert_eq!(toml, json);
    }

    #[test]
    fn test_failure_message_names_target() {
        let pipeline = Path::new("train.json");
        let err = PipelineError::TargetNotFound {
            target: "pkg::missing".to_string(),
            path: "root.model".to_string(),
        };
        assert_eq!(
            failure_message(pipeline, &err),
            "Pipeline train.json failed in target pkg::missing"
        );

        let err = PipelineError::InvalidConfig {
            path: "root".to_string(),
            reason: "bad".to_string(),
        };
        assert_eq!(failure_message(pipeline, &err), "Pipeline train.json failed");
    }

    #[test]
    fn test_load_document_reports_parse_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        let err = load_document(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
