//! Sensor reading injection utility
//!
//! Publishes integer readings to the sensor topics a running gateway
//! subscribes to, for bench testing the control rules without hardware.
//!
//! ## Usage
//!
//! ```bash
//! # Dark outside: lights should switch on
//! inject-reading --sensor illumination --value 1
//!
//! # Hot room, then a cool reading that starts the shutoff timer
//! inject-reading --sensor temperature --value 25
//! inject-reading --sensor temperature --value 18
//!
//! # A reading every 5 seconds
//! inject-reading --sensor temperature --value 18 --repeat 10 --every-secs 5
//! ```

use chrono::Local;
use clap::{Parser, ValueEnum};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, timeout, Duration};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SensorKind {
    Illumination,
    Temperature,
}

impl SensorKind {
    fn topic(self) -> &'static str {
        match self {
            SensorKind::Illumination => "casa/externo/luminosidade",
            SensorKind::Temperature => "casa/sala/temperatura",
        }
    }
}

#[derive(Parser)]
#[command(
    name = "inject-reading",
    about = "Publish sensor readings to a gateway node's sensor topics"
)]
struct Args {
    /// Which sensor topic to publish on
    #[arg(long, value_enum)]
    sensor: SensorKind,

    /// Integer reading
    #[arg(long, allow_hyphen_values = true)]
    value: i32,

    /// How many times to publish the reading
    #[arg(long, default_value = "1")]
    repeat: u32,

    /// Seconds between repeated readings
    #[arg(long, default_value = "1")]
    every_secs: u64,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,
}

async fn connect(host: &str, port: u16) -> Result<AsyncClient, Box<dyn std::error::Error>> {
    let client_id = format!(
        "inject-reading-{}",
        SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs()
    );
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let (connected_tx, connected_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let mut connected_tx = Some(connected_tx);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if let Some(tx) = connected_tx.take() {
                        let _ = tx.send(());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("MQTT eventloop error: {e}");
                    break;
                }
            }
        }
    });

    println!("Connecting to MQTT broker {host}:{port}...");
    match timeout(Duration::from_secs(10), connected_rx).await {
        Ok(Ok(())) => Ok(client),
        _ => Err(format!("could not connect to {host}:{port}").into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let client = match connect(&args.broker_host, args.broker_port).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("✗ {e}");
            std::process::exit(1);
        }
    };

    let topic = args.sensor.topic();
    for n in 1..=args.repeat.max(1) {
        client
            .publish(topic, QoS::AtLeastOnce, false, args.value.to_string())
            .await?;
        println!(
            "[{}] {} ← {} ({}/{})",
            Local::now().format("%H:%M:%S"),
            topic,
            args.value,
            n,
            args.repeat.max(1)
        );
        if n < args.repeat {
            sleep(Duration::from_secs(args.every_secs)).await;
        }
    }

    // Let the last publish leave before disconnecting
    sleep(Duration::from_millis(500)).await;
    client.disconnect().await?;
    println!("✓ Done");
    Ok(())
}
