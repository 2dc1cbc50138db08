//! PulsePilot CLI
//!
//! Usage:
//!   pulsepilot --snapshot vitals.json           # Assess a health_data message
//!   pulsepilot --snapshot vitals.json --json    # JSON output
//!   pulsepilot --serve                          # Companion HTTP API server
//!   pulsepilot --demo                           # Wearable ↔ companion exchange in-process

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulsepilot::core::{
    run_server, CommandRuntime, ExchangeOutcome, ExchangeProtocol, InferenceOrchestrator,
    LoaderConfig, LocalLink, ModelLoader, ModelTier, OrchestratorConfig,
};
use pulsepilot::types::{
    ExchangeMessage, HealthSnapshot, RiskAssessment, RiskAssessmentPayload, VitalKind,
};
use pulsepilot::{CACHE_TTL_SECS, MAX_WAIT_TICKS, VERSION, WAIT_TICK_MS};

#[derive(Parser, Debug)]
#[command(
    name = "pulsepilot",
    version = VERSION,
    about = "PulsePilot - Driving-risk assessment from wearable vital signs",
    long_about = "PulsePilot assesses whether it is safe to drive from recent vital signs.\n\n\
                  An on-device language model is used when one can be loaded; the\n\
                  rule engine answers otherwise.\n\n\
                  Modes:\n  \
                  --snapshot FILE  Assess a health_data message from a file\n  \
                  --serve          Companion HTTP/WebSocket server\n  \
                  --demo           Simulated wearable/companion exchange\n\n\
                  Risk levels:\n  \
                  LOW     - No out-of-range vitals\n  \
                  MEDIUM  - Mildly out of range, take care\n  \
                  HIGH    - Do not drive"
)]
struct Args {
    /// Assess the health_data message in this JSON file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Run as companion HTTP API server
    #[arg(short, long)]
    serve: bool,

    /// Run a simulated exchange between both roles
    #[arg(short, long)]
    demo: bool,

    /// Server address
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Primary model asset (GGUF)
    #[arg(long, default_value = "models/primary.gguf")]
    model: PathBuf,

    /// Smaller fallback model asset (GGUF)
    #[arg(long, default_value = "models/secondary.gguf")]
    fallback_model: PathBuf,

    /// Inference executable invoked per prompt
    #[arg(long, default_value = "llama-cli")]
    runner: PathBuf,

    /// Directory model assets are copied into before loading
    #[arg(long, default_value = "./model-cache")]
    cache_dir: PathBuf,

    /// Poll interval while another analysis is in flight (ms)
    #[arg(long, default_value_t = WAIT_TICK_MS)]
    wait_tick_ms: u64,

    /// Poll ticks before giving up on an in-flight analysis
    #[arg(long, default_value_t = MAX_WAIT_TICKS)]
    max_wait_ticks: u32,

    /// How long a finished assessment is shared (seconds)
    #[arg(long, default_value_t = CACHE_TTL_SECS)]
    cache_ttl_secs: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let orchestrator = build_orchestrator(&args);

    let result = if args.serve {
        run_serve(&args, orchestrator).await
    } else if let Some(ref path) = args.snapshot {
        run_snapshot(path, &args, orchestrator).await
    } else {
        // Default to the demo if no mode specified
        run_demo(&args, orchestrator).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "pulsepilot failed");
            ExitCode::FAILURE
        }
    }
}

fn build_orchestrator(args: &Args) -> InferenceOrchestrator {
    let loader = ModelLoader::new(
        Arc::new(CommandRuntime::new(args.runner.clone())),
        LoaderConfig {
            cache_dir: args.cache_dir.clone(),
            tiers: ModelTier::default_tiers(&args.model, &args.fallback_model),
        },
    );
    let config = OrchestratorConfig {
        wait_tick: Duration::from_millis(args.wait_tick_ms),
        max_wait_ticks: args.max_wait_ticks,
        cache_ttl: Duration::from_secs(args.cache_ttl_secs),
    };
    InferenceOrchestrator::new(Arc::new(loader), config)
}

/// Run the companion server
async fn run_serve(args: &Args, orchestrator: InferenceOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    // Loading continues in the background; requests use the rules meanwhile
    orchestrator.start();
    run_server(&args.addr, orchestrator).await
}

/// Assess one snapshot file
async fn run_snapshot(
    path: &Path,
    args: &Args,
    orchestrator: InferenceOrchestrator,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let snapshot = match ExchangeMessage::decode(&value)? {
        ExchangeMessage::HealthData(payload) => payload.to_snapshot()?,
        other => return Err(format!("expected health_data, found {}", other.type_name()).into()),
    };

    let state = orchestrator.start().await?;
    info!(%state, status = %orchestrator.model_status(), "model load settled");

    let assessment = orchestrator.assess_driving_risk(&snapshot).await;
    print_assessment(&assessment, args.json)?;
    orchestrator.shutdown().await;
    Ok(())
}

/// Run an in-process wearable/companion exchange
async fn run_demo(args: &Args, orchestrator: InferenceOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let (wearable_link, companion_link) = LocalLink::pair();
    let wearable_inbox = wearable_link.take_inbound().ok_or("wearable inbox already taken")?;
    let companion_inbox = companion_link.take_inbound().ok_or("companion inbox already taken")?;

    orchestrator.start().await?;
    let wearable = Arc::new(ExchangeProtocol::wearable(Arc::new(wearable_link)));
    let companion = Arc::new(ExchangeProtocol::companion(Arc::new(companion_link), orchestrator.clone()));
    Arc::clone(&wearable).serve(wearable_inbox);
    Arc::clone(&companion).serve(companion_inbox);

    let snapshot = demo_snapshot();
    wearable.record_snapshot(snapshot.clone());
    info!(status = %orchestrator.model_status(), "sending demo snapshot to companion");

    match wearable.send_health_data(&snapshot, true).await? {
        ExchangeOutcome::Replied(assessment) => print_assessment(&assessment, args.json)?,
        ExchangeOutcome::Acknowledged => println!("companion acknowledged without an assessment"),
    }
    orchestrator.shutdown().await;
    Ok(())
}

fn demo_snapshot() -> HealthSnapshot {
    let now = Utc::now();
    let earlier = now - chrono::Duration::seconds(60);
    HealthSnapshot::new(now)
        .with_values(VitalKind::HeartRate, &[(104.0, earlier), (118.0, now)])
        .with_values(VitalKind::Hrv, &[(26.0, now)])
        .with_values(VitalKind::BloodOxygen, &[(97.0, now)])
        .with_values(VitalKind::StepCount, &[(412.0, now)])
}

fn print_assessment(assessment: &RiskAssessment, json: bool) -> Result<(), serde_json::Error> {
    if json {
        let payload = RiskAssessmentPayload::from_assessment(assessment);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Risk level: {}", assessment.level());
    if assessment.factors().is_empty() {
        println!("Risk factors: none");
    } else {
        println!("Risk factors:");
        for factor in assessment.factors() {
            println!("  - {} [{}]", factor.description, factor.severity);
        }
    }
    println!("Recommendations:");
    for (i, rec) in assessment.recommendations().iter().enumerate() {
        println!("  {}. {}", i + 1, rec);
    }
    println!("\n{}", assessment.summary());
    Ok(())
}
