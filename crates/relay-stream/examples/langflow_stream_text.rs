use std::sync::Arc;

use relay_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), RelayError> {
    let url = std::env::var("LANGFLOW_RUN_URL")
        .map_err(|_| RelayError::Config("missing LANGFLOW_RUN_URL".into()))?;
    let config = RelayConfig::from_env()?;
    let mut endpoint = BotEndpoint::new(url);
    if let Ok(api_key) = std::env::var("LANGFLOW_API_KEY") {
        endpoint = endpoint.api_key(api_key);
    }

    let request = VendorKind::Langflow.build_request(
        &endpoint,
        &BotPayload::new("Stream a short greeting.", "example-session").uid("example"),
        true,
    );

    let outcome = StreamSession::new(
        Arc::new(HttpTransport::new(&config)?),
        VendorKind::Langflow,
        request,
    )
    .retry_policy(config.retry_policy())
    .handlers(
        Handlers::new()
            .on_message(|text| print!("{text}"))
            .on_end(|| println!())
            .on_error(|err| eprintln!("stream error: {err}")),
    )
    .start(CancelToken::new())
    .await?;

    eprintln!("{outcome:?}");
    Ok(())
}
