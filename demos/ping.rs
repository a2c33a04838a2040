//! Connect to an AMI server, log in, send a `Ping` and print events.
//!
//! ```text
//! AMI_HOST=127.0.0.1 AMI_USER=admin AMI_SECRET=amp111 cargo run --example ping
//! ```
//!
//! Set `RUST_LOG=debug` to see the session's tracing output.

use std::time::Duration;

use ami_client::{Client, Headers, StreamEvent};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let host = env_or("AMI_HOST", "127.0.0.1");
    let port: u16 = env_or("AMI_PORT", "5038").parse()?;

    let (client, mut events) = Client::builder()
        .host(host)
        .port(port)
        .credentials(env_or("AMI_USER", "admin"), env_or("AMI_SECRET", "amp111"))
        .connect_timeout(Duration::from_secs(5))
        .connect()
        .await?;

    let pong = client.send_action("Ping", Headers::new()).await?;
    println!("ping -> {:?}", pong.headers());
    if let Some(version) = client.ami_version() {
        println!("AMI version {}", version);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Event(event)) => println!("{}: {:?}", event.name(), event.headers()),
                Some(StreamEvent::Disconnected(reason)) => {
                    println!("disconnected: {}", reason);
                    break;
                }
                Some(StreamEvent::Connected) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                client.close().await;
            }
        }
    }

    client.wait_for_shutdown().await;
    Ok(())
}
