use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use murmur_client::ClientConfig;
use murmur_client::network::NetworkClient;
use murmur_client::state::StoredCredentials;

mod terminal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; stdout belongs to the chat view
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=info,murmur_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Murmur client...");

    // Load configuration
    let config = ClientConfig::load()?;
    tracing::info!("Using server {}", config.server_url);

    let network = Arc::new(NetworkClient::new(&config.server_url));
    let mut input = terminal::Input::new();

    loop {
        let Some(access_key) = terminal::authenticate(&network, &mut input).await? else {
            break;
        };

        match terminal::run(&config, network.clone(), access_key, &mut input).await? {
            terminal::Exit::Quit => break,
            terminal::Exit::SignedOut => {
                tracing::warn!("Access key no longer valid, please log in again");
                StoredCredentials::clear();
                network.set_access_key(None).await;
            }
        }
    }

    tracing::info!("Bye");
    Ok(())
}
