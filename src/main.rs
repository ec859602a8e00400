use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use perpcal::init_logging;
use perpcal_calibration::{
    BoltHeadTarget, BoltLayout, ConsoleOperator, FeelerGaugeTarget, LogReporter, Operator,
    ProbeSession, SimulatedOperator, TargetGeometry,
};
use perpcal_communication::{
    stage_bolt_start, stage_gauge_start, ChildProcessChannel, InjectedTilts, MotionChannel,
    MotionController, SerialChannel, Simulator, SimulatorChannel,
};
use perpcal_core::{CalibrationConfig, TransportKind};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Gauge,
    Bolt,
}

struct Args {
    config: Option<PathBuf>,
    target: Target,
    tilts: InjectedTilts,
    write_default_config: Option<PathBuf>,
}

const USAGE: &str = "\
Usage: perpcal [options]

Options:
  --config <path>                read configuration from a JSON file
  --target <gauge|bolt>          target geometry to calibrate (default gauge)
  --write-default-config <path>  write the default configuration and exit
  --z-tilt <a,b>                 inject a Z-axis tilt (simulator only), degrees
  --spindle-tilt <a,b>           inject a spindle tilt (simulator only), degrees
  --tool-tilt <a,b>              inject a tool tilt (simulator only), degrees
  --help                         show this help
";

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut args = Args {
        config: None,
        target: Target::Gauge,
        tilts: InjectedTilts::default(),
        write_default_config: None,
    };

    let mut raw = std::env::args().skip(1);
    while let Some(arg) = raw.next() {
        let mut value = || {
            raw.next()
                .with_context(|| format!("{} needs a value", arg))
        };
        match arg.as_str() {
            "--config" => args.config = Some(PathBuf::from(value()?)),
            "--target" => {
                args.target = match value()?.as_str() {
                    "gauge" => Target::Gauge,
                    "bolt" => Target::Bolt,
                    other => bail!("unknown target '{}', expected gauge or bolt", other),
                }
            }
            "--write-default-config" => {
                args.write_default_config = Some(PathBuf::from(value()?))
            }
            "--z-tilt" => args.tilts.z_axis = parse_pair(&value()?)?,
            "--spindle-tilt" => args.tilts.spindle = parse_pair(&value()?)?,
            "--tool-tilt" => args.tilts.tool = parse_pair(&value()?)?,
            "--help" | "-h" => {
                print!("{}", USAGE);
                return Ok(None);
            }
            other => bail!("unknown argument '{}'\n{}", other, USAGE),
        }
    }
    Ok(Some(args))
}

fn parse_pair(value: &str) -> anyhow::Result<(f64, f64)> {
    let (a, b) = value
        .split_once(',')
        .with_context(|| format!("expected 'a,b' degrees, got '{}'", value))?;
    Ok((
        a.trim().parse().context("first angle is not a number")?,
        b.trim().parse().context("second angle is not a number")?,
    ))
}

fn main() -> anyhow::Result<()> {
    init_logging()?;
    let Some(args) = parse_args()? else {
        return Ok(());
    };

    if let Some(path) = &args.write_default_config {
        CalibrationConfig::default().save_to_file(path)?;
        info!(path = %path.display(), "default configuration written");
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => CalibrationConfig::load_from_file(path)?,
        None => CalibrationConfig::default(),
    };
    config.validate()?;

    let transport = config.connection.transport;
    info!(%transport, target = ?args.target, "starting calibration");
    let channel: Box<dyn MotionChannel> = match transport {
        TransportKind::Serial => Box::new(SerialChannel::open(
            &config.connection.port,
            config.connection.baud_rate,
            Duration::from_secs_f64(config.connection.wait_seconds),
            Duration::from_millis(config.connection.timeout_ms),
        )?),
        TransportKind::Subprocess => {
            let extra: &[&str] = match args.target {
                Target::Gauge => &[],
                Target::Bolt => &["--bolt"],
            };
            Box::new(ChildProcessChannel::spawn(
                &config.connection.simulator_executable,
                extra,
            )?)
        }
        TransportKind::Simulator => Box::new(SimulatorChannel::new(match args.target {
            Target::Gauge => Simulator::gauge(&config.target),
            Target::Bolt => Simulator::bolt_head(&config.target),
        })),
    };

    let mut controller = MotionController::new(channel);
    controller.connect()?;

    // a real machine is staged by hand; the simulators are staged over
    // the wire, with whatever misalignments were asked for
    let simulated = transport != TransportKind::Serial;
    if simulated {
        match args.target {
            Target::Gauge => stage_gauge_start(
                &mut controller,
                &args.tilts,
                &config.target,
                &config.rotation,
            )?,
            Target::Bolt => stage_bolt_start(&mut controller, &args.tilts)?,
        }
    }

    let mut session = ProbeSession::new(&mut controller, &config);
    let mut reporter = LogReporter;
    match args.target {
        Target::Gauge => {
            FeelerGaugeTarget.calibrate(&mut session, &mut reporter)?;
        }
        Target::Bolt => {
            let operator: Box<dyn Operator<Box<dyn MotionChannel>>> = if simulated {
                Box::new(SimulatedOperator)
            } else {
                Box::new(ConsoleOperator)
            };
            let layout = BoltLayout {
                // backlash is only worth measuring on real hardware
                probe_away: !simulated,
                ..BoltLayout::default()
            };
            BoltHeadTarget::new(layout, operator).calibrate(&mut session, &mut reporter)?;
        }
    }
    Ok(())
}
