//! Live orientation monitor
//!
//! Run with: cargo run --example monitor
//!
//! Set RUST_LOG to change verbosity, e.g. RUST_LOG=orientation_sensor_ble=trace

use orientation_sensor_ble::{
    BtleplugTransport, CharacteristicSnapshot, Orientation, Result, SensorConfig, SensorSession,
    SessionEvent, StatusEvent,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

enum Step {
    Exit,
    Event(Option<SessionEvent>),
    Redraw,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("orientation_sensor_ble=debug")),
        )
        .init();

    println!("Orientation Monitor");
    println!("===================\n");

    let config = SensorConfig::default();
    let transport = BtleplugTransport::new()
        .await?
        .with_scan_timeout(config.scan_timeout)
        .with_connect_retries(3, Duration::from_secs(1));
    let mut session = SensorSession::new(transport, config);

    let _status = session.on_status(|status: &StatusEvent| {
        println!("[status] {}", status);
    });

    if session.scan_and_connect().await?.is_none() {
        return Ok(());
    }

    println!("Press Ctrl+C to exit.\n");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        let step = tokio::select! {
            _ = tokio::signal::ctrl_c() => Step::Exit,
            event = session.next_event() => Step::Event(event),
            _ = ticker.tick() => Step::Redraw,
        };

        match step {
            Step::Exit => {
                println!("\nExiting...");
                break;
            }
            Step::Event(Some(event)) => {
                session.process_event(event).await;
                if !session.state().is_connected() {
                    println!("Connection closed");
                    break;
                }
            }
            Step::Event(None) => break,
            Step::Redraw => display(&session.snapshots(), &session.orientation()),
        }
    }

    session.disconnect().await;

    Ok(())
}

fn display(snapshots: &[CharacteristicSnapshot], orientation: &Orientation) {
    for snapshot in snapshots {
        println!("  {}", snapshot);
    }

    let angle = |v: Option<f64>| match v {
        Some(v) => format!("{:8.2}", v),
        None => "      --".to_string(),
    };
    println!(
        "  pitch {}  roll {}  yaw {}\n",
        angle(orientation.pitch),
        angle(orientation.roll),
        angle(orientation.yaw)
    );
}
