//! Manual smoke-test entry point: connects with config read from the
//! environment, logs every event to stdout, and requests the equity
//! security list once logged in. Run with `PSX_FIX_*` vars set (see
//! `SessionConfig::from_env`) and `RUST_LOG=debug` for wire-level detail.

use psx_fix_client::{FixClient, FixEvent, SessionConfig};

#[tokio::main]
async fn main() {
    psx_fix_client::logging::init_tracing();

    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let client = FixClient::spawn(config);

    let mut logon_rx = client.subscribe("logon");
    let mut market_data_rx = client.subscribe("marketData");
    let mut security_list_rx = client.subscribe("securityList");
    let mut error_rx = client.subscribe("error");

    let logged_in_client = client.clone();
    tokio::spawn(async move {
        if logon_rx.recv().await.is_ok() {
            println!("logged in; requesting equity security list");
            let _ = logged_in_client.request_security_list("4").await;
        }
    });

    tokio::spawn(async move {
        while let Ok(FixEvent::SecurityList { securities, .. }) = security_list_rx.recv().await {
            println!("security list: {} entries", securities.len());
        }
    });

    tokio::spawn(async move {
        while let Ok(event) = market_data_rx.recv().await {
            println!("{event:?}");
        }
    });

    tokio::spawn(async move {
        while let Ok(FixEvent::Error { message }) = error_rx.recv().await {
            eprintln!("error: {message}");
        }
    });

    client.connect().await.expect("session owner task is running");

    tokio::signal::ctrl_c().await.ok();
    let _ = client.shutdown().await;
}
