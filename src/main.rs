use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use sharemyshows_dm::config::ClientConfig;
use sharemyshows_dm::messenger::Messenger;
use sharemyshows_dm::types::UserId;
use sharemyshows_dm::types::events::Event;
use sharemyshows_tokio_transport::TokioWebSocketTransportFactory;
use sharemyshows_ureq_http_client::UreqHttpClient;

// Demo: lists conversations, optionally opens one with a friend and sends a
// line, then prints channel activity until Ctrl-C.
//
// Usage:
//   cargo run -- --token <TOKEN>
//   cargo run -- --token <TOKEN> --open 42 --send "see you at the show"

#[derive(Parser)]
#[command(name = "sharemyshows-dm")]
#[command(about = "Direct messages for sharemyshows from the terminal")]
struct Cli {
    /// Service base URL, including the `/api` prefix.
    #[arg(long, env = "SHAREMYSHOWS_API_URL")]
    base_url: Option<String>,

    #[arg(long, env = "SHAREMYSHOWS_TOKEN")]
    token: String,

    /// Open (or create) the conversation with this friend.
    #[arg(long)]
    open: Option<UserId>,

    /// Text to send once the conversation is open.
    #[arg(long, requires = "open")]
    send: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.base_url {
        config = config.with_base_url(url)?;
    }

    let mut messenger = Messenger::builder()
        .with_config(config)
        .with_credential(cli.token)
        .with_transport_factory(TokioWebSocketTransportFactory::new())
        .with_http_client(UreqHttpClient::new())
        .on_event(|event, client| async move {
            match event {
                Event::TimelineChanged { .. } => {
                    if let Some(last) = client.timeline().await.last() {
                        info!("[{}] {}", last.sender_id, last.preview(80));
                    }
                }
                Event::TypingChanged {
                    username: Some(name),
                    ..
                } => info!("{name} is typing..."),
                Event::SendFailed(failed) => {
                    warn!("Message not sent ({}): {}", failed.reason, failed.body)
                }
                Event::ChannelRejected { reason } => error!("Channel refused: {reason}"),
                _ => {}
            }
        })
        .build()?;

    let channel_handle = messenger.run().await?;
    let client = messenger.client();

    for conversation in client.conversations().await {
        let preview = conversation
            .last_message
            .as_ref()
            .map(|m| m.preview(40))
            .unwrap_or_default();
        info!(
            "#{} {} ({} unread) {}",
            conversation.id, conversation.peer.username, conversation.unread_count, preview
        );
    }

    if let Some(peer) = cli.open {
        match client.open_conversation_with(peer).await {
            Ok(outcome) => info!("Conversation with {peer}: {outcome:?}"),
            Err(e) => error!("Could not open conversation with {peer}: {e}"),
        }
        if let Some(text) = cli.send
            && let Err(e) = client.send_text(text).await
        {
            error!("Send failed: {e}");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    messenger.shutdown().await;
    let _ = channel_handle.await;
    Ok(())
}
