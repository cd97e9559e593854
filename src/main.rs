use std::io::Write;
use std::sync::Arc;

use ssetap::api::{normalize_base_path, router};
use ssetap::config::{load_config, AppConfig};
use ssetap::error::StreamError;
use ssetap::observability::init_tracing;
use ssetap::state::AppState;
use ssetap::stream::{abortable, process_sse_stream, SseCallbacks};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

fn main() {
    let mut args = std::env::args().skip(1);
    let command = args.next();
    if command.as_deref() == Some("replay") {
        let Some(path) = args.next() else {
            eprintln!("usage: ssetap replay <capture-file>");
            std::process::exit(2);
        };
        // Replay works without a config file; logging falls back to INFO.
        let log_level = load_config("config.yaml")
            .map_or_else(|_| "INFO".to_string(), |config| config.features.log_level);
        init_tracing(&log_level);
        if let Err(err) = build_runtime().block_on(replay(&path)) {
            eprintln!("Replay of {path} failed: {err}");
            std::process::exit(1);
        }
        return;
    }

    let config = load_config("config.yaml").unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);
    build_runtime().block_on(serve(config));
}

fn build_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        })
}

async fn serve(config: AppConfig) {
    let host = config.server.host.clone();
    let port = config.server.port;
    let base_path = normalize_base_path(&config.server.base_path);

    let state = AppState::new(config).unwrap_or_else(|err| {
        eprintln!("Failed to initialize upstream client: {err}");
        std::process::exit(1);
    });
    tracing::info!(
        "ssetap starting on {}:{} with base_path='{}', upstream={}",
        host,
        port,
        base_path,
        state.endpoint()
    );
    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        });
    tracing::info!("ssetap is ready to accept connections");

    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}

/// Run a captured SSE body through the pump, echoing content to stdout.
async fn replay(path: &str) -> Result<(), StreamError> {
    let file = tokio::fs::File::open(path).await?;
    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut callbacks = SseCallbacks::new()
        .on_content(|delta, _full| {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        })
        .on_error(|error| tracing::error!("upstream error: {error}"))
        .on_usage(|usage| {
            tracing::info!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "usage reported"
            );
        })
        .on_finish(|| tracing::debug!("finish signal"));

    let stream = abortable(ReaderStream::new(file), token);
    let content = process_sse_stream(stream, &mut callbacks).await;
    println!();
    let content = content?;
    tracing::info!(content_bytes = content.len(), "replay complete");
    Ok(())
}
