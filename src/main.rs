use cast_bus::{AudioSource, PcmFormat};
use lite_cast::{
    config::{self, CastConfig},
    net,
    server::CastServer,
};
use tokio_util::sync::CancellationToken;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("cast_bus", log::LevelFilter::Debug)
        .filter_module("lite_cast", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

async fn open_source(config: &CastConfig) -> anyhow::Result<AudioSource> {
    let source = match config.input() {
        Some(path) => AudioSource::open(path).await?,
        None => AudioSource::stdin(),
    };
    if config.realtime() {
        return Ok(source.paced(PcmFormat::default().byte_rate()));
    }
    Ok(source)
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    let server = CastServer::new(config.server_options(), config.encoder_factory());
    let source = open_source(config).await.unwrap_or_else(|e| {
        log::error!("Error opening input: {:#}", e);
        std::process::exit(1);
    });
    if let Err(e) = server.set_input_stream(source).await {
        log::error!("Error attaching input: {}", e);
        std::process::exit(1);
    }

    let port = server.start(config.port()).await.unwrap_or_else(|e| {
        log::error!("Error starting server: {}", e);
        std::process::exit(1);
    });
    log::info!(
        "{} on air: http://{}:{}/listen.m3u",
        config.name(),
        net::url_host(net::local_address()),
        port
    );

    let cancel = CancellationToken::new();
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

    server.stop().await;
    std::process::exit(0);
}
