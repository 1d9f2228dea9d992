//! Extract command - run the pipeline on one image.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use console::style;
use serde_json::json;

use meter_core::create_pipeline;

use super::load_config;

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Local path or http(s) URL of the meter photo
    image_url: String,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit the full extraction report instead of just the fields
    #[arg(long)]
    report: bool,

    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

pub fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let pipeline = create_pipeline(&config).context("Failed to build OCR pipeline")?;

    let report = pipeline.run(&args.image_url)?;

    let value = if args.report {
        serde_json::to_value(&report)?
    } else {
        json!({ "fields": report.fields })
    };
    let output = if args.pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };

    match args.output {
        Some(path) => {
            fs::write(&path, output)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} Output written to {}",
                style("✓").green(),
                path.display()
            );
        }
        None => println!("{}", output),
    }

    if report.fields.failed_count() > 0 {
        eprintln!(
            "{} {} of {} fields could not be read",
            style("⚠").yellow(),
            report.fields.failed_count(),
            report.fields.len()
        );
    }

    Ok(())
}
