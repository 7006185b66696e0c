//! Talk to a VSDC4: identify it, run sequential measurements, or stress the transaction gate with
//! the staggered three-task scenario.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vsdc::prelude::*;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Optical link number of the bridge
    #[arg(long, default_value_t = 0)]
    link: u16,
    /// Board number on the link
    #[arg(long, default_value_t = 0)]
    board: u16,
    /// A32 base address of the VSDC4
    #[arg(long, value_parser = parse_address, default_value = "0x44000000")]
    base: u32,
    /// VME interrupt line the VSDC4 asserts
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=7))]
    irq: u8,
    /// First interrupt vector (channel 0's), the others follow
    #[arg(long, default_value_t = 1)]
    vector_base: u8,
    /// Run against the built-in simulator instead of hardware
    #[arg(long)]
    simulate: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Poll,
    Irq,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the device identification word
    Id,
    /// Measure channels one after another
    Scan {
        #[arg(long, value_delimiter = ',', default_values_t = [0u8, 1, 2, 3])]
        channels: Vec<u8>,
        #[arg(long, default_value_t = 100)]
        integration_ms: u64,
        #[arg(long, value_enum, default_value_t = Strategy::Poll)]
        strategy: Strategy,
        /// How often to check for completion
        #[arg(long, default_value_t = 10)]
        poll_ms: u64,
        /// Give up on a channel after this long
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
        /// Also read the waveforms and write them to `chN.csv`
        #[arg(long)]
        waveforms: bool,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Run the staggered arm / wait / load scenario
    Stress {
        #[arg(long, default_value_t = 100)]
        integration_ms: u64,
        #[arg(long, default_value_t = 50)]
        poll_ms: u64,
        /// Multiply the arm plan's delays by this
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        /// Stop waiting after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
        #[arg(long)]
        waveforms: bool,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Bad address `{s}`: {e}"))
}

fn write_waveforms(results: &[MeasurementResult], out_dir: &std::path::Path) -> anyhow::Result<()> {
    for result in results.iter().filter(|r| r.waveform.is_some()) {
        let path = out_dir.join(format!("ch{}.csv", result.channel.index()));
        let mut sink = CsvSink::create(&path)
            .with_context(|| format!("Creating {}", path.display()))?;
        result.write_waveform(&mut sink)?;
        info!(path = %path.display(), "Wrote waveform");
    }
    Ok(())
}

fn run<D: Driver>(driver: D, cli: &Cli, clock: Arc<dyn Clock>) -> anyhow::Result<()> {
    let irq = IrqLevel::from_number(cli.irq).context("Interrupt line out of range")?;
    let device = DeviceConfig {
        board: BoardType::V2718,
        link: cli.link,
        board_number: cli.board,
        irq,
    };
    let config = BoardConfig {
        base: cli.base,
        vectors: VectorMapping::with_base(cli.vector_base)?,
    };
    let board = Vsdc4::open(driver, device, config, clock).context("Error opening device")?;
    let outcome = execute(&board, &cli.command);
    // Close even if the command failed, then report the first failure
    let closed = board.close();
    outcome?;
    closed?;
    Ok(())
}

fn execute<D: Driver>(board: &Vsdc4<D>, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Id => println!("Value: {:08X}", board.device_id()?),
        Command::Scan {
            channels,
            integration_ms,
            strategy,
            poll_ms,
            timeout_ms,
            waveforms,
            out_dir,
        } => {
            let results = scan(
                board,
                channels,
                Duration::from_millis(*integration_ms),
                *strategy,
                Duration::from_millis(*poll_ms),
                Duration::from_millis(*timeout_ms),
                *waveforms,
            )?;
            write_waveforms(&results, out_dir)?;
        }
        Command::Stress {
            integration_ms,
            poll_ms,
            scale,
            deadline_ms,
            waveforms,
            out_dir,
        } => {
            let config = ScenarioConfig {
                integration_time: Duration::from_millis(*integration_ms),
                poll_interval: Duration::from_millis(*poll_ms),
                deadline: deadline_ms.map(Duration::from_millis),
                read_waveforms: *waveforms,
                ..Default::default()
            }
            .scaled(*scale);
            stress(board, &config, out_dir)?;
        }
    }
    Ok(())
}

fn scan<D: Driver>(
    board: &Vsdc4<D>,
    channels: &[u8],
    integration_time: Duration,
    strategy: Strategy,
    interval: Duration,
    timeout: Duration,
    waveform: bool,
) -> vsdc::Result<Vec<MeasurementResult>> {
    let channels = channels
        .iter()
        .map(|c| Channel::try_from(*c))
        .collect::<vsdc::Result<Vec<_>>>()?;
    let completion = match strategy {
        Strategy::Poll => Completion::Polling { interval, timeout },
        Strategy::Irq => Completion::Interrupt { interval, timeout },
    };
    let results = board.scan(
        &channels,
        integration_time,
        &Acquisition {
            completion,
            waveform,
        },
    )?;
    for r in &results {
        println!(
            "{}: integral {} flags {:?}",
            r.channel,
            r.integral,
            r.status.errors()
        );
    }
    Ok(results)
}

fn stress<D: Driver>(
    board: &Vsdc4<D>,
    config: &ScenarioConfig,
    out_dir: &std::path::Path,
) -> vsdc::Result<()> {
    let report = run_scenario(board, config)?;
    for c in &report.completions {
        println!(
            "{:>8.3}s vector {} {}: integral {:?} flags {:?}",
            c.at.as_secs_f64(),
            c.vector,
            c.channel,
            c.integral,
            c.status.errors()
        );
        if let Some(wf) = &c.waveform {
            let mut sink = CsvSink::create(out_dir.join(format!("ch{}.csv", c.channel.index())))?;
            sink.write_samples(wf.payload())?;
        }
    }
    println!(
        "mask {:04b}, {} load reads, {} violations, {} waiter errors, {} load errors",
        report.mask.bits(),
        report.load_reads,
        report.violations.len(),
        report.waiter_errors,
        report.load_errors
    );
    for v in &report.violations {
        println!("violation: {v:?}");
    }
    Ok(())
}

#[cfg(feature = "vendor")]
fn hardware(cli: &Cli) -> anyhow::Result<()> {
    run(
        caenvme::vendor::CaenVme::new(),
        cli,
        Arc::new(SystemClock::new()),
    )
}

#[cfg(not(feature = "vendor"))]
fn hardware(_cli: &Cli) -> anyhow::Result<()> {
    anyhow::bail!("Built without the `vendor` feature, only --simulate is available")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    if cli.simulate {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let irq = IrqLevel::from_number(cli.irq).context("Interrupt line out of range")?;
        let mock = MockVme::with_base(clock.clone(), cli.base, irq);
        run(mock, &cli, clock)
    } else {
        hardware(&cli)
    }
}
