use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use sensorbus::broker::{Message, MessageHandler};
use sensorbus::client::{ControlClient, ForwardedMessage};
use sensorbus::pipeline::StatusReport;
use sensorbus::producer::ProducerState;
use sensorbus::protocol::{CommandResponse, CommandType};
use sensorbus::reading::{AlertEvent, Reading, Scenario};
use sensorbus::reconnect::{reconnect_loop, ReconnectConfig};
use sensorbus::store::{TelemetrySnapshot, TelemetryStore};
use sensorbus::topic::ALERT_ROOT;
use sensorbus::view::{format_value, ScenarioView};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "1884";
const DEFAULT_MONITOR_PATTERN: &str = "#";
const MONITOR_RENDER_INTERVAL: Duration = Duration::from_secs(10);

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let scenario_arg = || {
        Arg::with_name("scenario")
            .help("Scenario name")
            .required(true)
            .possible_values(&["healthcare", "autonomous_vehicle", "defense", "home_iot", "generic"])
    };
    let sensor_arg = || Arg::with_name("sensor_id").help("Sensor id, e.g. hr_001").required(true);

    let matches = App::new("sensorbus")
        .version("0.1.0")
        .author("Sensor Systems Engineering Team")
        .about("Control client for the sensor telemetry simulator")
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("Test connection to the simulator"))
        .subcommand(SubCommand::with_name("status").about("Show every producer and bus statistics"))
        .subcommand(
            SubCommand::with_name("scenario")
                .about("Start or stop every producer of a scenario")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("start").arg(scenario_arg()))
                .subcommand(SubCommand::with_name("stop").arg(scenario_arg())),
        )
        .subcommand(SubCommand::with_name("start-all").about("Start every producer"))
        .subcommand(SubCommand::with_name("stop-all").about("Stop every producer"))
        .subcommand(
            SubCommand::with_name("sensor")
                .about("Control a single producer")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("start").arg(sensor_arg()))
                .subcommand(SubCommand::with_name("stop").arg(sensor_arg()))
                .subcommand(
                    SubCommand::with_name("isolate")
                        .about("Cut the producer off the bus while it keeps running")
                        .arg(sensor_arg()),
                )
                .subcommand(
                    SubCommand::with_name("recover")
                        .about("Reconnect an isolated producer")
                        .arg(sensor_arg()),
                ),
        )
        .subcommand(
            SubCommand::with_name("snapshot")
                .about("Print the current telemetry window")
                .arg(
                    Arg::with_name("scenario")
                        .long("scenario")
                        .short("s")
                        .takes_value(true)
                        .help("Only this scenario"),
                ),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Stream bus messages (Ctrl+C to stop)")
                .arg(
                    Arg::with_name("pattern")
                        .long("pattern")
                        .takes_value(true)
                        .default_value(DEFAULT_MONITOR_PATTERN)
                        .help("Topic pattern, e.g. alerts/# or sensor/healthcare/#"),
                )
                .arg(
                    Arg::with_name("scenario")
                        .long("scenario")
                        .short("s")
                        .takes_value(true)
                        .help("Scenario shown in the periodic summary"),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");
    let addr = format!("{host}:{port}");

    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).init();

    match matches.subcommand() {
        ("ping", _) => run_command(&addr, CommandType::Ping, "Ping", format).await?,
        ("status", _) => handle_status(&addr, format).await?,
        ("scenario", Some(sub)) => handle_scenario(sub, &addr, format).await?,
        ("start-all", _) => run_command(&addr, CommandType::StartAll, "Start all", format).await?,
        ("stop-all", _) => run_command(&addr, CommandType::StopAll, "Stop all", format).await?,
        ("sensor", Some(sub)) => handle_sensor(sub, &addr, format).await?,
        ("snapshot", Some(sub)) => handle_snapshot(sub, &addr, format).await?,
        ("monitor", Some(sub)) => handle_monitor(sub, &addr, format).await?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Run the simulator", "sensorbus-simulator --start all".bright_cyan());
            println!("  {} Test connection", "sensorbus ping".bright_cyan());
            println!("  {} Watch alerts", "sensorbus monitor --pattern alerts/#".bright_cyan());
        }
    }

    Ok(())
}

async fn handle_scenario(matches: &ArgMatches<'_>, addr: &str, format: &str) -> CliResult {
    match matches.subcommand() {
        ("start", Some(sub)) => {
            let scenario = sub.value_of("scenario").unwrap_or_default().to_string();
            run_command(addr, CommandType::StartScenario { scenario }, "Start scenario", format).await
        }
        ("stop", Some(sub)) => {
            let scenario = sub.value_of("scenario").unwrap_or_default().to_string();
            run_command(addr, CommandType::StopScenario { scenario }, "Stop scenario", format).await
        }
        _ => {
            println!("{}", "Scenario subcommand required. Use 'sensorbus scenario --help' for options.".yellow());
            Ok(())
        }
    }
}

async fn handle_sensor(matches: &ArgMatches<'_>, addr: &str, format: &str) -> CliResult {
    let (action, sub) = matches.subcommand();
    let Some(sensor_id) = sub.and_then(|sub| sub.value_of("sensor_id")).map(str::to_string) else {
        println!("{}", "Sensor subcommand required. Use 'sensorbus sensor --help' for options.".yellow());
        return Ok(());
    };
    let (command, label) = match action {
        "start" => (CommandType::StartSensor { sensor_id }, "Start sensor"),
        "stop" => (CommandType::StopSensor { sensor_id }, "Stop sensor"),
        "isolate" => (CommandType::IsolateSensor { sensor_id }, "Isolate sensor"),
        _ => (CommandType::RecoverSensor { sensor_id }, "Recover sensor"),
    };
    run_command(addr, command, label, format).await
}

async fn handle_status(addr: &str, format: &str) -> CliResult {
    let response = request(addr, CommandType::Status).await?;
    if format == "json" || !response.is_success() {
        print_response("Status", &response, format);
        return Ok(());
    }
    let Some(report) = response
        .data
        .clone()
        .and_then(|data| serde_json::from_value::<StatusReport>(data).ok())
    else {
        print_response("Status", &response, format);
        return Ok(());
    };

    println!("{}", "Producers".bright_blue().bold());
    println!(
        "{}",
        format!(
            "{:<10} {:<20} {:<18} {:<9} {:>9} {:>10}",
            "SENSOR", "SCENARIO", "TYPE", "STATE", "PUBLISHED", "SUPPRESSED"
        )
        .bright_white()
    );
    for producer in &report.producers {
        let state = match producer.state {
            ProducerState::Running => producer.state.to_string().bright_green(),
            ProducerState::Isolated => producer.state.to_string().bright_yellow(),
            ProducerState::Stopped => producer.state.to_string().dimmed(),
        };
        println!(
            "{:<10} {:<20} {:<18} {:<9} {:>9} {:>10}",
            producer.sensor_id,
            producer.scenario.as_str(),
            producer.sensor_type.as_str(),
            state,
            producer.published,
            producer.suppressed
        );
    }

    println!();
    println!("{}", "Bus".bright_blue().bold());
    println!(
        "published {}  delivered {}  dropped {}  handler failures {}  subscribers {}",
        report.broker.published.to_string().bright_cyan(),
        report.broker.delivered.to_string().bright_cyan(),
        report.broker.dropped.to_string().bright_yellow(),
        report.broker.handler_failures.to_string().bright_yellow(),
        report.broker.subscribers
    );
    println!(
        "rules: {} evaluated, {} alerts  store: {} readings, {} evicted  uptime {}s",
        report.rules.evaluated,
        report.rules.alerts_raised.to_string().bright_red(),
        report.store.readings,
        report.store.evicted,
        report.uptime_seconds
    );
    Ok(())
}

async fn handle_snapshot(matches: &ArgMatches<'_>, addr: &str, format: &str) -> CliResult {
    let scenario = matches.value_of("scenario").map(str::parse::<Scenario>).transpose()?;
    let response = request(
        addr,
        CommandType::Snapshot {
            scenario: scenario.map(|s| s.as_str().to_string()),
        },
    )
    .await?;
    if format == "json" || !response.is_success() {
        print_response("Snapshot", &response, format);
        return Ok(());
    }

    let snapshot = response
        .data
        .clone()
        .and_then(|data| serde_json::from_value::<TelemetrySnapshot>(data).ok())
        .unwrap_or_default();
    let view = scenario.map_or_else(ScenarioView::all, ScenarioView::scenario);
    print!("{}", view.render(&snapshot));
    Ok(())
}

async fn handle_monitor(matches: &ArgMatches<'_>, addr: &str, format: &str) -> CliResult {
    let pattern = matches.value_of("pattern").unwrap_or(DEFAULT_MONITOR_PATTERN);
    let view = match matches.value_of("scenario") {
        Some(name) => ScenarioView::scenario(name.parse()?),
        None => ScenarioView::all(),
    };

    println!(
        "{} {}",
        "Monitoring".bright_blue().bold(),
        format!("{pattern} on {addr} (Ctrl+C to stop)").dimmed()
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // Local window fed from the stream; restarts empty on reconnect.
    let mut store = TelemetryStore::default();
    let reconnect = ReconnectConfig::default();

    loop {
        let Some(mut client) =
            reconnect_loop(addr, &reconnect, &cancel, move || open_subscription(addr, pattern)).await
        else {
            break;
        };

        let mut render = tokio::time::interval(MONITOR_RENDER_INTERVAL);
        render.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = render.tick(), if format == "table" => {
                    println!("{}", "── summary ──".bright_white());
                    print!("{}", view.render(&store.snapshot()));
                }
                next = client.next_message() => match next {
                    Ok(Some(message)) => print_forwarded(&store, &message, format),
                    Ok(None) => {
                        eprintln!("{} {}", "🔌".yellow(), "Connection closed, reconnecting".yellow());
                        break;
                    }
                    Err(e) => {
                        eprintln!("{} {}", "🔌".yellow(), format!("Connection lost: {e}").yellow());
                        break;
                    }
                }
            }
        }
        store = TelemetryStore::default();
    }

    Ok(())
}

async fn open_subscription(addr: &str, pattern: &str) -> Result<ControlClient, Box<dyn std::error::Error>> {
    let mut client = ControlClient::connect(addr).await?;
    let response = client
        .send(CommandType::Subscribe {
            pattern: pattern.to_string(),
        })
        .await?;
    if !response.is_success() {
        return Err(response.message.unwrap_or_else(|| "subscription rejected".to_string()).into());
    }
    Ok(client)
}

fn print_forwarded(store: &TelemetryStore, forwarded: &ForwardedMessage, format: &str) {
    let message = Message {
        topic: forwarded.topic.clone(),
        payload: forwarded.payload.to_string(),
    };
    if let Err(e) = store.handle(&message) {
        tracing::debug!(topic = message.topic.as_str(), error = %e, "Unreadable payload");
    }

    if format == "json" {
        println!("{}", serde_json::json!({ "topic": forwarded.topic, "payload": forwarded.payload }));
        return;
    }

    if forwarded.topic.starts_with(ALERT_ROOT) {
        if let Ok(alert) = serde_json::from_value::<AlertEvent>(forwarded.payload.clone()) {
            println!(
                "{} {} {} {}",
                alert.timestamp.format("%H:%M:%S").to_string().dimmed(),
                "ALERT".bright_red().bold(),
                alert.sensor_id.bright_white(),
                alert.message.bright_red()
            );
            return;
        }
    } else if let Ok(reading) = serde_json::from_value::<Reading>(forwarded.payload.clone()) {
        println!(
            "{} {:<36} {}",
            reading.timestamp.format("%H:%M:%S").to_string().dimmed(),
            forwarded.topic.bright_cyan(),
            format_value(&reading.value)
        );
        return;
    }
    println!("{} {}", forwarded.topic.bright_cyan(), forwarded.payload);
}

async fn request(addr: &str, command: CommandType) -> Result<CommandResponse, Box<dyn std::error::Error>> {
    let mut client = match ControlClient::connect(addr).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} Failed to connect to simulator at {}", "❌".red(), addr.bright_white());
            eprintln!("{} Is it running? Start it with:", "💡".yellow());
            eprintln!("   {}", "cargo run --bin sensorbus-simulator".bright_cyan());
            return Err(e.into());
        }
    };
    Ok(client.send(command).await?)
}

async fn run_command(addr: &str, command: CommandType, action: &str, format: &str) -> CliResult {
    let response = request(addr, command).await?;
    print_response(action, &response, format);
    Ok(())
}

fn print_response(action: &str, response: &CommandResponse, format: &str) {
    if format == "json" {
        match serde_json::to_string_pretty(response) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{} Failed to encode response: {e}", "❌".red()),
        }
        return;
    }

    let message = response.message.as_deref().unwrap_or("");
    if response.is_success() {
        println!("{} {} {}", "✅".green(), action.bright_white(), message.bright_green());
    } else {
        println!(
            "{} {} failed ({:?}): {}",
            "❌".red(),
            action.bright_white(),
            response.status,
            message.bright_red()
        );
    }
}
