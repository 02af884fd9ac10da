//! Annotate CLI
//!
//! Reads one document per line from stdin, runs it through the requested
//! stages and writes every annotated document to stdout.
//!
//! # Usage
//!
//! ```bash
//! echo "Cats were sleeping." | annotate --stages lemma --format json
//! annotate --config pipeline.yaml --threads auto < corpus.txt
//! annotate --stages pos -p ssplit.boundaryTokens=". ;" --no-enforce < corpus.txt
//! ```

use annotation_pipeline::{
    Annotation, AnnotationPipeline, DocumentContext, PipelineConfig, PipelineError, StageCache,
    StageRegistry,
};
use annotation_pipeline::config::{
    ENFORCE_REQUIREMENTS_KEY, OUTPUT_FORMAT_KEY, STAGES_KEY, THREADS_KEY,
};
use anyhow::Context;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "annotate")]
#[command(about = "Run text documents through an annotation pipeline", long_about = None)]
struct Cli {
    /// Comma-separated stage list (dependencies are added automatically)
    #[arg(short, long)]
    stages: Option<String>,

    /// YAML pipeline configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads: a number or "auto"
    #[arg(short, long)]
    threads: Option<String>,

    /// Output format (text, json, json-pretty)
    #[arg(short, long)]
    format: Option<String>,

    /// Skip the static requirement check
    #[arg(long)]
    no_enforce: bool,

    /// Extra property, repeatable: -p key=value
    #[arg(short = 'p', long = "property", value_name = "KEY=VALUE")]
    properties: Vec<String>,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let cache = StageCache::new();
    let pipeline = match AnnotationPipeline::new(config, &StageRegistry::with_builtins(), &cache) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Cannot build pipeline: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&pipeline) {
        Ok(failed) => {
            info!("Done ({} document(s) failed)", failed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            PipelineConfig::from_yaml_str(&yaml)?
        }
        None => PipelineConfig::default(),
    };

    config.apply_properties(command_line_properties(cli)?)?;

    if config.stages.is_empty() {
        return Err(PipelineError::config("no stages requested (use --stages or a config file)").into());
    }
    Ok(config)
}

/// `-p` pairs first, then the dedicated flags, so a flag wins over a `-p`
/// pair for the same key and both win over the config file
fn command_line_properties(cli: &Cli) -> anyhow::Result<Vec<(String, String)>> {
    let mut props = Vec::new();
    for property in &cli.properties {
        let (key, value) = property
            .split_once('=')
            .with_context(|| format!("property '{}' is not KEY=VALUE", property))?;
        props.push((key.to_string(), value.to_string()));
    }
    if let Some(stages) = &cli.stages {
        props.push((STAGES_KEY.to_string(), stages.clone()));
    }
    if let Some(threads) = &cli.threads {
        let threads = if threads.eq_ignore_ascii_case("auto") {
            num_cpus::get().to_string()
        } else {
            threads.clone()
        };
        props.push((THREADS_KEY.to_string(), threads));
    }
    if let Some(format) = &cli.format {
        props.push((OUTPUT_FORMAT_KEY.to_string(), format.clone()));
    }
    if cli.no_enforce {
        props.push((ENFORCE_REQUIREMENTS_KEY.to_string(), "false".to_string()));
    }
    Ok(props)
}

/// Annotate stdin; documents are written in input order
fn run(pipeline: &AnnotationPipeline) -> anyhow::Result<usize> {
    let (tx, rx) = crossbeam_channel::unbounded::<(usize, Annotation)>();

    let stdin = io::stdin();
    let mut submitted = 0;
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let tx = tx.clone();
        let index = submitted;
        pipeline.annotate_with(DocumentContext::new(line), move |annotation| {
            let _ = tx.send((index, annotation));
        });
        submitted += 1;
    }
    pipeline.shutdown();
    drop(tx);

    let mut annotations: Vec<_> = rx.iter().collect();
    annotations.sort_by_key(|(index, _)| *index);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failed = 0;
    for (_, annotation) in &annotations {
        if !annotation.is_success() {
            failed += 1;
        }
        pipeline.write_output(&annotation.document, &mut out)?;
    }
    out.flush()?;

    info!(
        "Annotated {} document(s) with [{}]",
        annotations.len(),
        pipeline.stage_names().join(", ")
    );
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(args: &[&str]) -> anyhow::Result<PipelineConfig> {
        let cli = Cli::try_parse_from(std::iter::once("annotate").chain(args.iter().copied()))?;
        build_config(&cli)
    }

    #[test]
    fn test_core_keys_from_property_flags() {
        let config = config_for(&[
            "--stages",
            "lemma",
            "-p",
            "threads=4",
            "-p",
            "enforceRequirements=false",
            "-p",
            "outputFormat=json",
        ])
        .unwrap();

        assert_eq!(config.stages, vec!["lemma"]);
        assert_eq!(config.threads, 4);
        assert!(!config.enforce_requirements);
        assert_eq!(config.output_format, "json");
    }

    #[test]
    fn test_stages_from_property_flag() {
        let config = config_for(&["-p", "stages=tokenize,ssplit", "-p", "pos.model=x"]).unwrap();
        assert_eq!(config.stages, vec!["tokenize", "ssplit"]);
        assert_eq!(config.property("pos.model"), Some("x"));
    }

    #[test]
    fn test_dedicated_flag_wins_over_property() {
        let config = config_for(&["--stages", "pos", "-p", "threads=4", "--threads", "2"]).unwrap();
        assert_eq!(config.threads, 2);
    }

    #[test]
    fn test_config_file_values_survive_unrelated_flags() {
        let path = std::env::temp_dir().join(format!("annotate-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "stages: tokenize\nthreads: 3\noutputFormat: json\n").unwrap();

        let config = config_for(&["--config", path.to_str().unwrap(), "-p", "enforceRequirements=false"]);
        std::fs::remove_file(&path).unwrap();
        let config = config.unwrap();

        assert_eq!(config.stages, vec!["tokenize"]);
        assert_eq!(config.threads, 3);
        assert_eq!(config.output_format, "json");
        assert!(!config.enforce_requirements);
    }

    #[test]
    fn test_malformed_property_and_missing_stages() {
        assert!(config_for(&["--stages", "pos", "-p", "threads"]).is_err());
        assert!(config_for(&["-p", "threads=2"]).is_err());
    }
}
