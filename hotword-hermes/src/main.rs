/// Hermes hotword service binary
///
/// Listens for Hermes audio frames over MQTT and publishes hotword
/// detections, or processes a single WAV file from stdin with --stdin-audio.

use anyhow::Context;
use hotword_hermes::{init_logging, Cli, Detector, EnergyDetector, HotwordService, MqttTransport};
use std::io::IsTerminal;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.debug);

    debug!("{:?}", cli);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    debug!("Shutting down");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.to_config().context("Failed to load configuration")?;

    let service = HotwordService::from_config(&config, || {
        Box::new(EnergyDetector::new()) as Box<dyn Detector>
    })
    .context("Failed to load detectors")?;

    if cli.stdin_audio {
        // Read WAV from stdin, detect, and exit
        let stdin = std::io::stdin();
        if stdin.is_terminal() {
            eprintln!("Reading WAV data from stdin...");
        }

        let count = service
            .run_batch(stdin.lock(), std::io::stdout().lock())
            .context("Failed to process WAV from stdin")?;
        debug!("{} event(s) written", count);
        return Ok(());
    }

    let transport = MqttTransport::new(&config.mqtt);
    service.start();

    info!("Listening for hotwords on {}:{}", config.mqtt.host, config.mqtt.port);

    transport
        .run(&service, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    service.stop();
    Ok(())
}
