//! SegmentForge: customer segmentation CLI
//!
//! Runs the cleaning, feature and clustering stages over a transaction CSV,
//! writes the requested tables, and optionally assigns one extra customer.

use anyhow::{Context, Result};
use clap::Parser;
use segmentforge::{run_from_path, write_table, Args, PipelineOutput, FEATURE_COLUMNS};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    let config = args.pipeline_config().context("invalid configuration")?;
    let predict_values = args.parse_feature_values()?;

    let mut output = run_from_path(&args.input, &config)
        .with_context(|| format!("pipeline failed for {}", args.input.display()))?;

    write_outputs(&args, &mut output)?;
    print_cluster_summary(&output);

    if let Some(values) = predict_values {
        let normalizer = segmentforge::StandardScaler::load(&config.normalizer_path)
            .context("failed to reload normalizer for prediction")?;
        let cluster = output.clusters.predict(&values, &normalizer)?;
        println!("\nPredicted cluster for {:?}: {}", values, cluster);
    }

    Ok(())
}

fn write_outputs(args: &Args, output: &mut PipelineOutput) -> Result<()> {
    if let Some(path) = &args.clean_output {
        write_table(&mut output.cleaned, path)
            .with_context(|| format!("failed to write cleaned data to {}", path.display()))?;
        tracing::info!(path = %path.display(), "cleaned transactions written");
    }

    if let Some(path) = &args.features_output {
        write_table(&mut output.features.table, path)
            .with_context(|| format!("failed to write features to {}", path.display()))?;
        tracing::info!(path = %path.display(), "customer features written");
    }

    write_table(&mut output.clusters.table, &args.output)
        .with_context(|| format!("failed to write clusters to {}", args.output.display()))?;
    tracing::info!(path = %args.output.display(), "clustered customers written");

    Ok(())
}

fn print_cluster_summary(output: &PipelineOutput) {
    let clusters = &output.clusters;
    let total = clusters.labels.len();

    println!("=== Cluster Statistics ===");
    println!("{:<8} {:>9} {}", "Cluster", "Customers", FEATURE_COLUMNS.join(" | "));
    for (i, size) in clusters.cluster_sizes().into_iter().enumerate() {
        let percentage = (size as f64 / total as f64) * 100.0;
        let profile: Vec<String> = clusters
            .profiles
            .row(i)
            .iter()
            .map(|v| format!("{v:.2}"))
            .collect();
        println!(
            "{:<8} {:>5} ({:.1}%) {}",
            i,
            size,
            percentage,
            profile.join(" | ")
        );
    }
    println!("Within-cluster sum of squares: {:.2}", clusters.inertia);
}
