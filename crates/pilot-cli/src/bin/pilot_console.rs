use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pilot_cli::input::HELP;
use pilot_cli::{parse_line, telemetry_line, OperatorInput};
use pilot_core::{DroneCommand, DroneState, FlightMode, MoveCommand, Simulator};
use pilot_link::{run_diagnostics, LinkConfig, Snapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::interval;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Operator console for the drone link", long_about = None)]
struct Args {
    /// Backend host (overrides PILOT_BACKEND_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Backend port (overrides PILOT_BACKEND_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Backend WebSocket path (overrides PILOT_BACKEND_WS_PATH)
    #[arg(long, global = true)]
    path: Option<String>,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Interactive console reading commands from stdin
    Run {
        /// Connect to the backend on startup
        #[arg(long)]
        connect: bool,

        /// Start in simulation mode
        #[arg(long, conflicts_with = "connect")]
        fallback: bool,

        /// Telemetry print period in milliseconds
        #[arg(long, default_value_t = 500)]
        print_every_ms: u64,
    },
    /// Check whether the backend is reachable
    Diagnose {
        /// Per-probe timeout in milliseconds
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the fallback simulator headless after a takeoff
    Simulate {
        /// Simulated duration in seconds
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,

        /// Extra up/down stick input after takeoff (-100..100)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        climb: f64,

        /// Yaw stick input after takeoff (-100..100)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        yaw: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("pilot_link=info".parse()?))
        .init();

    let args = Args::parse();
    let mut config = LinkConfig::from_env();
    if let Some(host) = args.host {
        config.backend_host = host;
    }
    if let Some(port) = args.port {
        config.backend_port = port;
    }
    if let Some(path) = args.path {
        config.backend_path = path;
    }

    match args.command {
        Mode::Run {
            connect,
            fallback,
            print_every_ms,
        } => run_console(config, connect, fallback, Duration::from_millis(print_every_ms.max(50))).await,
        Mode::Diagnose { timeout_ms, json } => diagnose(&config, Duration::from_millis(timeout_ms), json).await,
        Mode::Simulate { seconds, climb, yaw } => simulate(seconds, climb, yaw, config.tick_interval),
    }
}

async fn run_console(config: LinkConfig, connect: bool, fallback: bool, print_every: Duration) -> Result<()> {
    println!("Backend: {}", config.ws_url());
    let (link, task) = pilot_link::spawn(config);

    if fallback {
        link.set_fallback_mode(true).await?;
    } else if connect {
        link.connect().await?;
    }

    let printer = tokio::spawn(print_telemetry(link.subscribe(), print_every));
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_line(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{:#}", e);
                continue;
            }
        };

        match input {
            OperatorInput::Command(command) => link.send_command(command).await?,
            OperatorInput::Connect => link.connect().await?,
            OperatorInput::Disconnect => link.disconnect().await?,
            OperatorInput::Fallback(enabled) => link.set_fallback_mode(enabled).await?,
            OperatorInput::Status => println!("{}", serde_json::to_string_pretty(&link.snapshot())?),
            OperatorInput::Help => println!("{}", HELP),
            OperatorInput::Quit => break,
        }
    }

    link.shutdown().await?;
    task.await?;
    printer.abort();
    Ok(())
}

/// Print a telemetry line whenever it changes, at most once per period.
async fn print_telemetry(mut rx: watch::Receiver<Snapshot>, period: Duration) {
    let mut ticker = interval(period);
    let mut last_line = String::new();
    let mut last_error: Option<String> = None;

    loop {
        ticker.tick().await;
        if rx.has_changed().is_err() {
            break;
        }

        let (line, error) = {
            let snapshot = rx.borrow_and_update();
            (telemetry_line(&snapshot), snapshot.last_error.clone())
        };

        if error != last_error {
            if let Some(error) = &error {
                eprintln!("! {}", error);
            }
            last_error = error;
        }
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }
    }
}

async fn diagnose(config: &LinkConfig, limit: Duration, json: bool) -> Result<()> {
    let report = run_diagnostics(config, limit).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Backend WebSocket URL: {}", report.ws_url);
    println!("Backend HTTP URL:      {}", report.http_url);
    println!("Deployment host:       {}", config.deployment_host.as_deref().unwrap_or("(local)"));
    println!("Starts in simulation:  {}", report.starts_in_fallback);
    println!("HTTP probe:            {}", report.http);
    println!("WebSocket probe:       {}", report.websocket);
    if !report.websocket.is_success() {
        println!("Backend unreachable; the console will run in simulation mode.");
    }
    Ok(())
}

fn simulate(seconds: f64, climb: f64, yaw: f64, tick: Duration) -> Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("--seconds must be positive");
    }

    let start = Instant::now();
    let mut simulator = Simulator::new(start);
    let mut state = DroneState::default();
    let mut mode = FlightMode::default();

    simulator.apply(&DroneCommand::Takeoff, &mut state, &mut mode);
    if climb != 0.0 || yaw != 0.0 {
        let stick = MoveCommand {
            up_down: climb.clamp(-100.0, 100.0),
            yaw: yaw.clamp(-100.0, 100.0),
            ..MoveCommand::default()
        };
        simulator.apply(&DroneCommand::Move(stick), &mut state, &mut mode);
    }

    let dt = tick.as_secs_f64();
    let steps = (seconds / dt).ceil() as u32;
    let report_every = ((0.25 / dt).round() as u32).max(1);

    let mut now = start;
    for step in 1..=steps {
        now += tick;
        simulator.tick(&mut state, now);
        if step % report_every == 0 || step == steps {
            let target = simulator.target();
            println!(
                "t={:6.2}s alt {:.3}m -> {:.2}m  yaw {:6.2} -> {:6.2}  {}",
                step as f64 * dt,
                state.altitude,
                target.target_altitude,
                state.attitude.yaw,
                target.target_yaw,
                if state.is_flying { "flying" } else { "grounded" }
            );
        }
    }
    Ok(())
}
