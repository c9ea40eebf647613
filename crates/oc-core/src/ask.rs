//! One-shot mode: send a prompt, render the streamed answer, and exit.

use std::io::Write;

use oc_backend::OllamaClient;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::renderer::SnapshotRenderer;
use crate::session::{ChatRequest, RequestOutcome, RequestState};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CANCELLED: i32 = 130;

/// Process exit code for a finished request.
pub fn exit_code(state: &RequestState) -> i32 {
    match state {
        RequestState::Completed => EXIT_OK,
        RequestState::Cancelled => EXIT_CANCELLED,
        _ => EXIT_FAILURE,
    }
}

/// Run `prompt` against the configured backend, rendering into `writer`.
pub async fn run_ask<W>(
    config: &Config,
    client: &OllamaClient,
    prompt: &str,
    writer: W,
    is_tty: bool,
    cancel: CancellationToken,
) -> RequestOutcome
where
    W: Write + Send + 'static,
{
    let options = config.request_options();
    let markers = options.assembler.markers.clone();

    let request = client
        .request(prompt)
        .with_stream(config.backend.stream)
        .with_system(config.backend.system.clone());
    info!(
        model = %request.model,
        stream = request.stream,
        prompt_len = prompt.len(),
        "starting request"
    );

    let mut chat = ChatRequest::new(options);
    chat.subscribe(Box::new(SnapshotRenderer::new(writer, is_tty, markers)));
    chat.run(client.generate(&request), cancel).await
}
