#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::io::{self, BufWriter, Write};

use anyhow::{Context, bail};
use clap::Parser;
use config::{CliArgs, Command, NodeConfig};
use duuid::{AllocatorRegistry, DayEpoch, DuuId, DuuidGenerator};
use telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = NodeConfig::try_from(args)?;

    init_telemetry()?;

    match &config.command {
        Command::Generate { count, padded } => generate(&config, *count, *padded).await,
        Command::Decode { ids } => decode(&config, ids),
    }
}

async fn generate(config: &NodeConfig, count: u64, padded: bool) -> anyhow::Result<()> {
    let layout = config.generator.validate()?;
    // Only the static backend ships without an external client.
    let allocator = AllocatorRegistry::new()
        .build(config.generator.allocator_backend, &layout)
        .context("selecting the worker id allocator")?;

    let generator = DuuidGenerator::start(config.generator.clone(), allocator, &config.identity)
        .await
        .context("starting the generator")?;
    log_startup_info(config, &generator);

    let mut out = BufWriter::new(io::stdout().lock());
    let written = (0..count).try_for_each(|_| -> anyhow::Result<()> {
        let id = generator.next_duuid()?;
        if padded {
            writeln!(out, "{}", id.to_padded_string())?;
        } else {
            writeln!(out, "{id}")?;
        }
        Ok(())
    });
    let flushed = out.flush();

    generator.close();
    tracing::info!(stats = ?generator.stats(), "done");
    written?;
    flushed?;
    Ok(())
}

fn decode(config: &NodeConfig, ids: &[u64]) -> anyhow::Result<()> {
    let layout = config.generator.validate()?;
    let epoch = DayEpoch::new(config.generator.epoch, &layout)?;

    let mut out = BufWriter::new(io::stdout().lock());
    for &raw in ids {
        if raw > i64::MAX as u64 {
            bail!("{raw} has the sign bit set and is not a valid id");
        }
        let id = DuuId::from_raw(layout, raw);
        let date = epoch
            .date_of(id.day_offset())
            .map_or_else(|| "-".to_owned(), |d| d.to_string());
        writeln!(
            out,
            "{raw}\tworker_id={}\tday_offset={}\tdate={date}\tsequence={}",
            id.worker_id(),
            id.day_offset(),
            id.sequence()
        )?;
    }
    out.flush()?;
    Ok(())
}

fn log_startup_info<T, R>(config: &NodeConfig, generator: &DuuidGenerator<T, R>) {
    tracing::info!(
        node_name = config.identity.node_name(),
        worker_id = generator.worker_identity().worker_id(),
        acquired_at = %generator.worker_identity().acquired_at(),
        backend = %config.generator.allocator_backend,
        mode = ?generator.mode(),
        "worker identity acquired"
    );
}
