//! Poll every power device on a simulated board.
//!
//! Builds one of each device type over the in-memory hardware models, loads
//! them through the registry and reads a tuple from every provider at a
//! fixed interval.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;

use pmu_pwrdev::{
    block_activity::{self, AdcLink, BaDescriptor, BaRailConfig},
    bus::I2cDevice,
    config::MonitorConfig,
    device::{DeviceDescriptor, DeviceType, PwrContext, Registry},
    gpu_adc::{self, AdcGeneration, AdcProvider, GpuAdcDescriptor},
    peripheral::{
        ina219::{self, Ina219Descriptor},
        ina3221::{self, Ina3221Channel, Ina3221Descriptor, ShuntResistance},
        nct3933u::{self, Nct3933uDescriptor},
    },
    sim::{SimBoard, SimRail},
    tracing::{self, prelude::*},
    types::Tuple,
};

const INA219_INDEX: u8 = 0;
const INA3221_INDEX: u8 = 1;
const NCT3933U_INDEX: u8 = 2;
const ADC_INDEX: u8 = 3;
const BA_INDEX: u8 = 4;

const INA3221_ADDRESS: u8 = 0x41;
const ADC_BASE: u32 = 0x0020_0000;
const GPU_RAIL: u8 = 0;

/// Power device monitor over a simulated board
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Milliseconds between polls
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Number of polls; 0 runs until interrupted
    #[arg(short = 'n', long)]
    iterations: Option<u32>,

    /// Print each reading as a JSON line
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Reading {
    iteration: u32,
    device: u8,
    device_type: DeviceType,
    provider: u8,
    #[serde(flatten)]
    tuple: Tuple,
}

fn descriptors() -> Vec<(u8, DeviceDescriptor)> {
    let all_channels = ina3221::protocol::config::channel_enable(0)
        | ina3221::protocol::config::channel_enable(1)
        | ina3221::protocol::config::channel_enable(2)
        | 0x0127;

    vec![
        (
            INA219_INDEX,
            DeviceDescriptor::Ina219(Ina219Descriptor {
                bus: I2cDevice::big_endian(ina219::protocol::DEFAULT_ADDRESS, 0),
                configuration: 0x399F,
                calibration: 4096,
                shunt_mohm: 10,
            }),
        ),
        (
            INA3221_INDEX,
            DeviceDescriptor::Ina3221(Ina3221Descriptor {
                bus: I2cDevice::big_endian(INA3221_ADDRESS, 0),
                configuration: all_channels,
                mask_enable: ina3221::protocol::mask_enable::summation(0)
                    | ina3221::protocol::mask_enable::summation(1),
                channels: [Ina3221Channel::uncorrected(ShuntResistance::Milliohms(5)); 3],
            }),
        ),
        (
            NCT3933U_INDEX,
            DeviceDescriptor::Nct3933u(Nct3933uDescriptor {
                bus: I2cDevice::big_endian(nct3933u::protocol::DEFAULT_ADDRESS, 0),
                channel_count: 2,
                default_limit_ma: 40_000,
                step_ma: 250,
            }),
        ),
        (
            ADC_INDEX,
            DeviceDescriptor::GpuAdc(GpuAdcDescriptor {
                generation: AdcGeneration::V11,
                base: ADC_BASE,
                oversample: 4,
                code_max: 1023,
                bus_full_scale_uv: 1_023_000,
                shunt_full_scale_uv: 102_300,
                sample_period_us: 10,
                providers: vec![AdcProvider {
                    bus: Some(0),
                    shunt: Some(1),
                    multiplier: Some(0),
                    shunt_mohm: 1,
                    bus_full_scale_uv: None,
                }],
                calibration: Vec::new(),
            }),
        ),
        (
            BA_INDEX,
            DeviceDescriptor::BlockActivity(BaDescriptor {
                window: 0,
                window_size_log2: 8,
                step_size_log2: 4,
                current_mode: false,
                fixed_coefficients: false,
                leakage_lut: false,
                dba_period: 0,
                dba_coeffs: [0; 3],
                temperature_offset: 0,
                rails: [Some(BaRailConfig::direct(GPU_RAIL, 1_200_000)), None, None, None],
                adc_link: Some(AdcLink {
                    device_index: ADC_INDEX,
                    provider: 0,
                    threshold_count: 2,
                }),
            }),
        ),
    ]
}

/// Seed the simulated hardware with plausible readings.
fn seed(board: &SimBoard) {
    board.rails.insert(GPU_RAIL, SimRail::logic(900_000));

    // 12 V at 2048 current LSBs
    let ina219_addr = ina219::protocol::DEFAULT_ADDRESS;
    board
        .i2c
        .set_reg16_be(ina219_addr, ina219::protocol::regs::BUS_VOLTAGE, 3000 << 3);
    board
        .i2c
        .set_reg16_be(ina219_addr, ina219::protocol::regs::CURRENT, 2048);
    board
        .i2c
        .set_reg16_be(ina219_addr, ina219::protocol::regs::POWER, 1229);

    use ina3221::protocol::{self as p, regs};
    board
        .i2c
        .set_reg16_be(INA3221_ADDRESS, regs::MANUFACTURER_ID, p::EXPECTED_MANUFACTURER_ID);
    board
        .i2c
        .set_reg16_be(INA3221_ADDRESS, regs::DIE_ID, p::EXPECTED_DIE_ID);
    for ch in 0..p::CHANNEL_COUNT {
        board
            .i2c
            .set_reg16_be(INA3221_ADDRESS, regs::bus_voltage(ch), 1500 << p::CHANNEL_SHIFT);
        board
            .i2c
            .set_reg16_be(INA3221_ADDRESS, regs::shunt_voltage(ch), 125 << p::CHANNEL_SHIFT);
    }
    board
        .i2c
        .set_reg16_be(INA3221_ADDRESS, regs::SHUNT_SUM, 250 << p::SUM_SHIFT);

    board.regs.set(ADC_BASE + gpu_adc::regs::iir(0), 4 * 880);
    board.regs.set(ADC_BASE + gpu_adc::regs::iir(1), 4 * 120);
    board.regs.set(ADC_BASE + gpu_adc::regs::mult(0), 4 * 880 * 120);

    board.regs.set(block_activity::regs::window_sum(0), 150_000);
}

/// Advance the free-running ADC accumulators as if time passed.
fn tick(board: &SimBoard, samples: u64) {
    use pmu_pwrdev::hw_trait::RegisterIo;

    let advance = |lo: u32, per_sample: u64| {
        let lo = ADC_BASE + lo;
        let raw = ((board.regs.read(lo + 4) as u64) << 32) | board.regs.read(lo) as u64;
        let next = raw.wrapping_add(per_sample * samples);
        board.regs.set(lo, next as u32);
        board.regs.set(lo + 4, (next >> 32) as u32);
    };
    advance(gpu_adc::regs::acc_lo(0), 880);
    advance(gpu_adc::regs::acc_lo(1), 120);
    advance(gpu_adc::regs::mult_acc_lo(0), 880 * 120);
}

async fn poll(
    registry: &mut Registry,
    ctx: &PwrContext,
    iteration: u32,
    json: bool,
) -> Result<()> {
    for device in registry.indices().collect::<Vec<_>>() {
        let dev = registry.device(device)?.as_device();
        let (device_type, providers) = (dev.device_type(), dev.provider_count());

        for provider in 0..providers {
            let tuple = match registry.tuple_get(ctx, device, provider).await {
                Ok(tuple) => tuple,
                Err(e) if e.is_not_supported() => continue,
                Err(e) => {
                    warn!(device, %device_type, provider, error = %e, "Tuple read failed");
                    continue;
                }
            };

            if json {
                let reading = Reading {
                    iteration,
                    device,
                    device_type,
                    provider,
                    tuple,
                };
                println!("{}", serde_json::to_string(&reading)?);
            } else {
                info!(
                    device,
                    %device_type,
                    provider,
                    voltage_uv = tuple.voltage_uv,
                    current_ma = tuple.current_ma,
                    power_mw = tuple.power_mw,
                    energy_mj = tuple.energy_mj,
                    "Reading"
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing::init_stdout();

    let mut config = MonitorConfig::default();
    if let Some(interval_ms) = args.interval_ms {
        config.poll_interval_ms = interval_ms;
    }
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    config.json |= args.json;

    let board = SimBoard::new();
    seed(&board);
    let shutdown = CancellationToken::new();
    let (ctx, bus_task) = board.spawn_context(config.bus, shutdown.clone());

    let mut registry = Registry::new();
    for (index, descriptor) in descriptors() {
        registry
            .construct(index, descriptor)
            .with_context(|| format!("Failed to construct device {}", index))?;
    }
    registry
        .load_all(&ctx)
        .await
        .context("Failed to load devices")?;
    info!(devices = registry.len(), "Devices loaded");

    for status in registry.status() {
        debug!(
            index = status.index,
            device = %status.device_type,
            providers = status.provider_count,
            thresholds = status.threshold_count,
            "Device status"
        );
    }

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut interval = tokio::time::interval(config.poll_interval());
    let samples_per_poll = config.poll_interval_ms.saturating_mul(100);
    let mut iteration = 0u32;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = sigint.recv() => {
                info!("Received SIGINT");
                break;
            }
        }

        tick(&board, samples_per_poll);
        if let Err(e) = registry.state_sync_all(&ctx).await {
            warn!(error = %e, "State sync failed");
        }
        poll(&mut registry, &ctx, iteration, config.json).await?;

        iteration += 1;
        if config.iterations != 0 && iteration >= config.iterations {
            break;
        }
    }

    trace!("Shutting down.");
    shutdown.cancel();
    bus_task.await.context("Bus task panicked")?;
    info!("Exiting.");
    Ok(())
}
