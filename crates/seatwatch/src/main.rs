use std::sync::Arc;

use tracing::{info, warn};

use seatwatch_core::{
    config::Config,
    dispatcher::UpdateDispatcher,
    donations::DonationRegistry,
    fanout::Notifier,
    ports::MessagingPort,
    store::JsonFileStore,
    subscribers::SubscriberRegistry,
    verify::StarVerifier,
};
use seatwatch_github::GitHubClient;
use seatwatch_telegram::{api::ApiClient, poll::UpdatePoller, TelegramMessenger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    seatwatch_core::logging::init("seatwatch")?;

    let cfg = Arc::new(Config::load()?);

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(&cfg.bot_token));
    let github = Arc::new(GitHubClient::new(
        cfg.github_owner.clone(),
        cfg.github_repo.clone(),
        cfg.github_token.clone(),
    ));
    let verifier = Arc::new(StarVerifier::new(github));

    let subscribers = Arc::new(SubscriberRegistry::open(Arc::new(JsonFileStore::new(
        cfg.subscribers_file.clone(),
    )))?);
    let donations = Arc::new(DonationRegistry::open(Arc::new(JsonFileStore::new(
        cfg.donations_file.clone(),
    )))?);

    let notifier = Notifier::new(cfg.clone(), messenger.clone());
    if notifier.test_connection().await {
        info!("connected; test message delivered to the admin chat");
    } else {
        warn!("test message to the admin chat failed");
    }

    let dispatcher = Arc::new(UpdateDispatcher::new(
        cfg.clone(),
        subscribers,
        donations,
        verifier,
        messenger,
    ));
    let poller = Arc::new(UpdatePoller::new(
        ApiClient::new(&cfg.bot_token),
        dispatcher,
        cfg.multi_user,
    ));
    poller.start_polling();

    // The scrape-and-notify loop is an external collaborator driving the
    // Notifier; this process only hosts the update loop.
    poller.wait().await;
    Ok(())
}
