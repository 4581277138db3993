//! chime entry point.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use chime::auth::CredentialStore;
use chime::config::Settings;
use chime::notify::{AlertBackend, Notifier};
use chime::provider::GmailMailbox;
use chime::watch::Watcher;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chime=info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let settings =
        Settings::load(&Settings::default_path()).context("failed to load settings")?;

    let mut store = CredentialStore::new(
        settings.auth.token_path(),
        settings.auth.client_secret_path(),
        settings.auth.callback_timeout(),
    );
    store
        .obtain()
        .await
        .context("failed to obtain mailbox credential")?;

    let mailbox = GmailMailbox::new(store);
    let notifier = Notifier::new(AlertBackend::detect(settings.alert.mode));

    println!("Watching for new mail received today. Press Ctrl-C to stop.");
    tracing::info!(
        interval_secs = settings.poll.interval_seconds,
        backoff_secs = settings.poll.error_backoff_seconds,
        "starting watch loop"
    );

    let mut watcher = Watcher::new(mailbox, notifier, &settings.poll);
    watcher.run().await?;
    Ok(())
}
