use std::io::Write as _;
use std::sync::Arc;

use relay_chat::{
    ChatSink, MessageId, MessageStatus, RelayOrchestrator, RelayOutcome, SinkError, TaskKey,
    TaskRegistry, init_observability,
};
use relay_stream::{BotEndpoint, BotPayload, HttpTransport, RelayConfig, RelayError, VendorKind};

/// Prints deltas to stdout and the final state to stderr.
struct ConsoleSink;

#[async_trait::async_trait]
impl ChatSink for ConsoleSink {
    async fn create_placeholder(&self, task: &TaskKey) -> Result<MessageId, SinkError> {
        eprintln!("[{task}] waiting for bot reply");
        Ok(uuid::Uuid::new_v4())
    }

    async fn push_delta(&self, _message: MessageId, delta: &str) -> Result<(), SinkError> {
        print!("{delta}");
        std::io::stdout()
            .flush()
            .map_err(|e| SinkError::Other(e.to_string()))
    }

    async fn persist(
        &self,
        message: MessageId,
        text: &str,
        status: MessageStatus,
    ) -> Result<(), SinkError> {
        println!();
        eprintln!("[{message}] stored {} chars as {status:?}", text.len());
        Ok(())
    }

    async fn remove(&self, message: MessageId) -> Result<(), SinkError> {
        eprintln!("[{message}] removed");
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), RelayError> {
    init_observability();

    let url = std::env::var("BOT_RUN_URL")
        .map_err(|_| RelayError::Config("missing BOT_RUN_URL".into()))?;
    let vendor: VendorKind = std::env::var("BOT_VENDOR")
        .unwrap_or_else(|_| "langflow".to_string())
        .parse()
        .map_err(RelayError::Config)?;
    let mut endpoint = BotEndpoint::new(url);
    if let Ok(api_key) = std::env::var("BOT_API_KEY") {
        endpoint = endpoint.api_key(api_key);
    }

    let config = RelayConfig::from_env()?;
    let relay = RelayOrchestrator::new(
        Arc::new(HttpTransport::new(&config)?),
        TaskRegistry::new(),
        Arc::new(ConsoleSink),
        config,
    );
    let outcome = relay
        .relay_stream(
            TaskKey::new(vendor.as_str(), "console"),
            vendor,
            &endpoint,
            &BotPayload::new("Stream a short greeting.", "console-session"),
        )
        .await;

    if let RelayOutcome::Failed { message } = outcome {
        eprintln!("relay failed: {message}");
    }
    Ok(())
}
