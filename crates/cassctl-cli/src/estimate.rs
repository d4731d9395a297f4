//! The `estimate` subcommand.

use std::fmt::Write as _;
use std::process::ExitCode;

use anyhow::{bail, Context};
use cassctl_core::Quantity;
use cassctl_scheduler::{
    Estimator, KubeClusterState, SimulationConfig, SimulationReport, TaintEffect, Toleration,
    TopologyMode, WorkloadProfile,
};
use clap::{Args, ValueEnum};
use tracing::debug;

/// How the result is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Text,
    /// The full report as JSON.
    Json,
}

/// Arguments of `cassctl estimate`.
#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Number of pods to add.
    #[arg(long, short = 'n')]
    pub count: usize,

    /// CPU request per pod, as a Kubernetes quantity (`2`, `1500m`).
    #[arg(long)]
    pub cpu: Quantity,

    /// Memory request per pod, as a Kubernetes quantity (`4Gi`, `512Mi`).
    #[arg(long)]
    pub memory: Quantity,

    /// Toleration added to every pod. Repeatable.
    #[arg(long = "toleration", value_name = "KEY[=VALUE][:EFFECT]", value_parser = parse_toleration)]
    pub tolerations: Vec<Toleration>,

    /// Node label every pod requires. Repeatable.
    #[arg(long = "node-selector", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub node_selector: Vec<(String, String)>,

    /// Forbid two of the new pods from sharing a value of this node label.
    #[arg(long, value_name = "TOPOLOGY_KEY")]
    pub spread_by: Option<String>,

    /// Build the topology index from a pod watch instead of the listing.
    #[arg(long)]
    pub live_topology: bool,

    /// Seconds allowed for the topology index to sync.
    #[arg(long, value_name = "SECONDS")]
    pub sync_timeout: Option<u64>,

    /// Seconds allowed for listing nodes and pods.
    #[arg(long, value_name = "SECONDS")]
    pub list_timeout: Option<u64>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl EstimateArgs {
    /// The per-pod profile described by the arguments.
    fn profile(&self) -> anyhow::Result<WorkloadProfile> {
        if self.cpu.is_negative() || self.memory.is_negative() {
            bail!("resource requests must not be negative");
        }
        Ok(WorkloadProfile {
            cpu_millis: self
                .cpu
                .milli_value()
                .with_context(|| format!("invalid cpu request {}", self.cpu))?,
            memory_bytes: self
                .memory
                .value()
                .with_context(|| format!("invalid memory request {}", self.memory))?,
            tolerations: self.tolerations.clone(),
            node_selector: self.node_selector.iter().cloned().collect(),
            spread_by: self.spread_by.clone(),
        })
    }

    /// Apply the command-line overrides on top of `base`.
    fn config(&self, base: SimulationConfig) -> SimulationConfig {
        let mut config = base;
        if let Some(secs) = self.list_timeout {
            config.list_timeout_secs = secs;
        }
        if let Some(secs) = self.sync_timeout {
            config.sync_timeout_secs = secs;
        }
        if self.live_topology {
            config.topology_mode = TopologyMode::Live;
        }
        config
    }
}

/// Run the estimate against the current kube context.
///
/// Exits with failure when the pods do not fit.
pub async fn run(args: EstimateArgs) -> anyhow::Result<ExitCode> {
    let profile = args.profile()?;
    let config = args.config(SimulationConfig::from_env());
    debug!(?config, ?profile, count = args.count, "Running estimate");

    let provider = KubeClusterState::new(config.clone())
        .await
        .context("failed to connect to the Kubernetes cluster")?;
    let estimator = Estimator::new(provider, config);
    let report = estimator
        .estimate_uniform(args.count, &profile)
        .await
        .context("feasibility estimate failed")?;

    match args.output {
        OutputFormat::Text => print!("{}", render_text(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(if report.is_feasible() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn render_text(report: &SimulationReport) -> String {
    let mut out = String::new();
    for assignment in &report.assignments {
        let _ = writeln!(out, "{} -> {}", assignment.workload, assignment.node);
    }
    let _ = writeln!(out, "{}", report.verdict);
    out
}

/// Parse `key[=value][:effect]`. Without a value the operator is `Exists`.
fn parse_toleration(input: &str) -> Result<Toleration, String> {
    let (spec, effect) = match input.rsplit_once(':') {
        Some((spec, effect)) => {
            let effect = TaintEffect::from_k8s(effect)
                .ok_or_else(|| format!("unknown taint effect {effect:?}"))?;
            (spec, Some(effect))
        }
        None => (input, None),
    };

    let toleration = match spec.split_once('=') {
        Some((key, value)) => Toleration::equal(key, value),
        None => Toleration::exists(spec),
    };
    toleration.validate()?;

    Ok(match effect {
        Some(effect) => toleration.with_effect(effect),
        None => toleration,
    })
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {input:?}")),
    }
}
