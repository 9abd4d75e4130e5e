use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::PathBuf;

use neuroscan::confidence::SynthesizedConfidence;
use neuroscan::finding::ClinicalFinding;
use neuroscan::gateway::{GatewayConfig, GradioGateway};
use neuroscan::image::ImageUpload;
use neuroscan::normalize::{finding_for, resolve};
use neuroscan::{FallbackPolicy, FindingSource};

/// Exit code when a tumor class is reported.
const EXIT_TUMOR_DETECTED: i32 = 2;

#[derive(Parser)]
#[command(
    name = "neuroscan",
    about = "Brain-MRI tumor classification with deterministic clinical interpretation."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP classification service
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Rate limit in requests per minute per IP (0 = no limit)
        #[arg(long, default_value_t = 60)]
        rate_limit: u32,

        /// Path for JSONL access log
        #[arg(long, default_value = "neuroscan-access.jsonl")]
        access_log: String,

        /// Path to persist usage counters across restarts
        #[arg(long)]
        metrics_path: Option<String>,

        /// Return 503 instead of a synthesized finding when the classifier is down
        #[arg(long)]
        strict: bool,
    },

    /// Classify an MRI image through the remote model
    Classify {
        /// Path to a PNG or JPEG image
        #[arg(long)]
        input: PathBuf,

        /// Output format: json or summary
        #[arg(long, default_value = "summary")]
        format: String,

        /// Fail instead of synthesizing a finding when the classifier is down
        #[arg(long)]
        strict: bool,
    },

    /// Normalize a raw model payload without calling the model
    Normalize {
        /// Payload as JSON text (a bare word is treated as a string)
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Path to a file holding the JSON payload
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Output format: json or summary
        #[arg(long, default_value = "summary")]
        format: String,
    },
}

fn policy(strict: bool) -> FallbackPolicy {
    if strict {
        FallbackPolicy::Propagate
    } else {
        FallbackPolicy::Synthesize
    }
}

fn print_summary(finding: &ClinicalFinding, source: &FindingSource) {
    println!("MRI Classification Results");
    println!("==========================");
    println!("Finding:        {}", finding.display_name());
    println!("Label:          {}", finding.label());
    println!("Confidence:     {:.1}%", finding.confidence());
    println!("Severity:       {}", finding.severity().as_str());
    println!("Source:         {}", source.as_str());
    if let FindingSource::Fallback { reason } = source {
        println!("                (classifier unavailable: {})", reason);
        println!("                This finding is NOT derived from the image.");
    }
    println!();
    println!("Recommendation:");
    println!("  {}", finding.recommendation());
}

fn cmd_serve(
    bind: String,
    rate_limit: u32,
    access_log: String,
    metrics_path: Option<String>,
    strict: bool,
) -> Result<()> {
    use neuroscan::server::{run_server, ServerConfig};

    let bind_addr = bind
        .parse()
        .wrap_err_with(|| format!("Invalid bind address: {}", bind))?;

    let config = ServerConfig {
        bind_addr,
        rate_limit_rpm: rate_limit,
        access_log_path: access_log,
        metrics_path,
        fallback_policy: policy(strict),
        gateway: GatewayConfig::from_env()?,
        ..Default::default()
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_server(config))?;

    Ok(())
}

fn cmd_classify(input: PathBuf, format: String, strict: bool) -> Result<i32> {
    let image = ImageUpload::from_path(&input)?;
    let gateway = GradioGateway::new(GatewayConfig::from_env()?)?;
    let mut rng = StdRng::from_os_rng();

    let rt = tokio::runtime::Runtime::new()?;
    let classification = rt
        .block_on(neuroscan::classify_with_policy(
            &gateway,
            &image,
            policy(strict),
            &mut rng,
        ))
        .wrap_err("Classification failed")?;

    match format.as_str() {
        "json" => {
            let result = serde_json::json!({
                "success": true,
                "image": input.display().to_string(),
                "image_digest": image.digest(),
                "finding": classification.finding,
                "source": classification.source,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_summary(&classification.finding, &classification.source),
    }

    if classification.finding.tumor_detected() {
        Ok(EXIT_TUMOR_DETECTED)
    } else {
        Ok(0)
    }
}

fn cmd_normalize(payload: Option<String>, payload_file: Option<PathBuf>, format: String) -> Result<()> {
    let text = match (payload, payload_file) {
        (Some(p), _) => p,
        (None, Some(path)) => fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?,
        (None, None) => eyre::bail!("Provide --payload or --payload-file"),
    };
    // Bare words like `glioma` are not valid JSON; treat them as string payloads.
    let payload: serde_json::Value =
        serde_json::from_str(&text).unwrap_or_else(|_| serde_json::Value::String(text.clone()));

    let resolution = resolve(&payload);
    let finding = finding_for(
        &resolution,
        &mut SynthesizedConfidence::new(StdRng::from_os_rng()),
    );

    match format.as_str() {
        "json" => {
            let result = serde_json::json!({
                "finding": finding,
                "resolution": resolution,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_summary(&finding, &FindingSource::Model);
            println!();
            println!("Canonical:      {:?}", resolution.canonical);
            println!("Strategy:       {:?}", resolution.strategy);
            println!(
                "Matched key:    {}",
                resolution.matched_key.unwrap_or("(none, defaulted)")
            );
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            bind,
            rate_limit,
            access_log,
            metrics_path,
            strict,
        } => cmd_serve(bind, rate_limit, access_log, metrics_path, strict),
        Commands::Classify {
            input,
            format,
            strict,
        } => match cmd_classify(input, format, strict) {
            Ok(code) => {
                if code != 0 {
                    std::process::exit(code);
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Commands::Normalize {
            payload,
            payload_file,
            format,
        } => cmd_normalize(payload, payload_file, format),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
