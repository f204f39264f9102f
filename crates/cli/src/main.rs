use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};

use nalu_common::{DummyWriter, GumbelNacConfig, SummaryWriter, TracingWriter};
use nalu_core::{GumbelNacLayer, TauDecay, TauSchedule};

/// Parameter prefix of the layer inside checkpoints written by this tool.
const LAYER_PREFIX: &str = "nac";

#[derive(Parser, Debug)]
#[command(name = "nalu", about = "Inspect and exercise Gumbel NAC layers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a layer config JSON.
    InitConfig(InitConfigArgs),
    /// Build a freshly reset layer and save its parameters.
    Save(SaveArgs),
    /// Run one forward pass and print output and weights.
    Probe(ProbeArgs),
    /// Print a temperature annealing schedule.
    Anneal(AnnealArgs),
}

// ── Init / Save ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct InitConfigArgs {
    #[arg(long, default_value = "config.json")]
    output: PathBuf,
    #[arg(long, default_value_t = 2)]
    in_features: usize,
    #[arg(long, default_value_t = 1)]
    out_features: usize,
    #[arg(long)]
    sample_each_observation: bool,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Parser, Debug)]
struct SaveArgs {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    #[arg(long, default_value = "model.safetensors")]
    output: PathBuf,
}

// ── Probe ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct ProbeArgs {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    /// Parameters to load; a freshly reset layer is used when omitted.
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// One observation as comma-separated values; repeat for a batch.
    #[arg(long = "input", required = true)]
    inputs: Vec<String>,
    /// Override the temperature.
    #[arg(long)]
    tau: Option<f64>,
    /// Evaluate a second time with the same noise and check the outputs match.
    #[arg(long)]
    check_reuse: bool,
    /// Emit layer statistics as tracing events (see RUST_LOG).
    #[arg(long)]
    trace_stats: bool,
}

// ── Anneal ─────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct AnnealArgs {
    #[arg(long, default_value_t = 1.0)]
    tau_start: f64,
    #[arg(long, default_value_t = 0.01)]
    tau_end: f64,
    #[arg(long, default_value_t = 10_000)]
    anneal_steps: usize,
    #[arg(long, default_value = "exponential", value_parser = ["linear", "exponential", "none"])]
    decay: String,
    #[arg(long, default_value_t = 1000)]
    every: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::InitConfig(args) => cmd_init_config(args),
        Command::Save(args) => cmd_save(args),
        Command::Probe(args) => cmd_probe(args),
        Command::Anneal(args) => cmd_anneal(args),
    }
}

// ── Command implementations ────────────────────────────────────────────────────

fn cmd_init_config(args: InitConfigArgs) -> Result<()> {
    let config = GumbelNacConfig {
        in_features: args.in_features,
        out_features: args.out_features,
        sample_each_observation: args.sample_each_observation,
        seed: args.seed,
        ..Default::default()
    };
    config.save(&args.output)?;
    eprintln!("Wrote {}", args.output.display());
    Ok(())
}

fn build_layer(
    config: &GumbelNacConfig,
    writer: Arc<dyn SummaryWriter>,
    device: &Device,
) -> Result<(GumbelNacLayer, VarMap)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let layer = GumbelNacLayer::new(config, writer, vb.pp(LAYER_PREFIX))?;
    layer.reset_parameters()?;
    Ok((layer, varmap))
}

fn cmd_save(args: SaveArgs) -> Result<()> {
    let config = GumbelNacConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let (layer, varmap) = build_layer(&config, DummyWriter::shared(), &Device::Cpu)?;
    varmap.save(&args.output)?;
    tracing::info!(layer = %layer, path = %args.output.display(), "checkpoint saved");
    eprintln!("Saved {layer} to {}", args.output.display());
    Ok(())
}

fn parse_inputs(rows: &[String], in_features: usize) -> Result<Vec<f32>> {
    let mut values = Vec::with_capacity(rows.len() * in_features);
    for (i, row) in rows.iter().enumerate() {
        let parsed = row
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("input {i}: {row:?}"))?;
        if parsed.len() != in_features {
            bail!(
                "input {i} has {} values, layer expects in_features={in_features}",
                parsed.len()
            );
        }
        values.extend(parsed);
    }
    Ok(values)
}

fn cmd_probe(args: ProbeArgs) -> Result<()> {
    let device = Device::Cpu;
    let config = GumbelNacConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let writer: Arc<dyn SummaryWriter> = if args.trace_stats {
        TracingWriter::new().namespace(LAYER_PREFIX)
    } else {
        DummyWriter::shared()
    };

    let (layer, mut varmap) = build_layer(&config, writer, &device)?;
    if let Some(path) = &args.checkpoint {
        varmap
            .load(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    if let Some(tau) = args.tau {
        layer.set_tau(tau);
    }

    let values = parse_inputs(&args.inputs, config.in_features)?;
    let x = Tensor::from_vec(values, (args.inputs.len(), config.in_features), &device)?;

    let y = layer.forward(&x, false)?;
    eprintln!("{layer}  tau={}", layer.tau());
    for (i, row) in y.to_vec2::<f32>()?.iter().enumerate() {
        println!("output[{i}] = {row:?}");
    }

    if args.check_reuse {
        let again = layer.forward(&x, true)?;
        let same = again.to_vec2::<f32>()? == y.to_vec2::<f32>()?;
        println!("reuse reproduces output: {same}");
    }

    println!("expected weights:");
    for row in layer.expected_weights()?.to_vec2::<f32>()? {
        println!("  {row:?}");
    }
    println!("discrete weights:");
    for row in layer.discrete_weights()?.to_vec2::<f32>()? {
        println!("  {row:?}");
    }
    let (neg, zero, pos) = layer.debug_weight_distribution()?;
    println!("ternary -1:{neg} 0:{zero} +1:{pos}");
    layer.log_summary()?;
    Ok(())
}

fn cmd_anneal(args: AnnealArgs) -> Result<()> {
    if args.tau_start <= 0.0 || args.tau_end <= 0.0 {
        bail!("temperatures must be positive");
    }
    let schedule = TauSchedule::new(
        args.tau_start,
        args.tau_end,
        args.anneal_steps,
        TauDecay::from_str(&args.decay),
    );
    let every = args.every.max(1);
    let mut step = 0;
    loop {
        println!("step {step:>8}  tau {:.6}", schedule.tau_at(step));
        if step >= args.anneal_steps {
            break;
        }
        step = (step + every).min(args.anneal_steps);
    }
    Ok(())
}
