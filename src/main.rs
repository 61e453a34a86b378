use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod error;
mod handler;
mod manager;
mod media;
// The SDK integration drives SourceHandle; nothing in the binary itself does.
#[allow(dead_code)]
mod source;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();

    let cancel = CancellationToken::new();
    api::start_api_server(cancel.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    // Let session tasks run their ordered teardown before the process goes
    // away; muxer children are killed on drop regardless.
    manager::shutdown().await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    std::process::exit(0)
}
