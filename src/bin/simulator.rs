use clap::{App, Arg};
use sensorbus::bridge;
use sensorbus::config::SimulationConfig;
use sensorbus::pipeline::Pipeline;
use sensorbus::reading::Scenario;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("sensorbus-simulator")
        .version("0.1.0")
        .author("Sensor Systems Engineering Team")
        .about("Simulated sensor telemetry pipeline with a TCP control bridge")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON simulation config")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Bridge listen address (overrides the config)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("generic")
                .long("generic")
                .help("Also run the single-scenario temperature/humidity/motion sensors"),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("RNG seed for reproducible runs")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Seed must be a non-negative integer".into()),
                }),
        )
        .arg(
            Arg::with_name("start")
                .long("start")
                .value_name("SCENARIO")
                .help("Start producers on launch (`all` or a scenario name)")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = match matches.value_of("config") {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(listen) = matches.value_of("listen") {
        config.listen_addr = listen.to_string();
    }
    if matches.is_present("generic") {
        config.enable_generic = true;
    }
    if let Some(seed) = matches.value_of("seed") {
        config.seed = Some(seed.parse()?);
    }

    let listen_addr = config.listen_addr.clone();
    let pipeline = Arc::new(Pipeline::build(config)?);

    if let Some(targets) = matches.values_of("start") {
        let mut controller = pipeline.controller().await;
        for target in targets {
            let outcome = if target == "all" {
                controller.start_all()
            } else {
                let scenario: Scenario = target.parse()?;
                controller.start_scenario(scenario)
            };
            match outcome {
                Ok(outcome) => info!(start = target, "{}", outcome.message),
                Err(e) => error!(start = target, error = %e, "Failed to start producers"),
            }
        }
    }

    let listener = TcpListener::bind(&listen_addr).await?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(bridge::serve(listener, Arc::clone(&pipeline), shutdown.clone()));

    info!(addr = listen_addr.as_str(), "Simulator running (Ctrl+C to stop)");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Bridge error"),
        Err(e) => error!(error = %e, "Bridge task failed"),
    }
    pipeline.shutdown().await?;

    let stats = pipeline.broker().stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        dropped = stats.dropped,
        handler_failures = stats.handler_failures,
        "Simulator stopped"
    );
    Ok(())
}
