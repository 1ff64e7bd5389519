// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Process entrypoint: opens the store, runs migrations, and idles until
//! SIGINT/SIGTERM. Everything a caller actually drives -- sync, search,
//! rules -- happens through `intentmail_core::facade`, invoked by whatever
//! process embeds this crate; this binary only owns the store's lifecycle.

use intentmail_core::config::Settings;
use intentmail_core::store::Store;
use log::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    let store = match Store::open(&settings.db_path).await {
        Ok(store) => store,
        Err(err) => {
            error!("failed to open store at {}: {err}", settings.db_path);
            std::process::exit(1);
        }
    };

    info!("intentmaild ready, db={}", settings.db_path);

    if let Err(err) = wait_for_shutdown_signal().await {
        error!("error waiting for shutdown signal: {err}");
        store.close().await;
        std::process::exit(1);
    }

    info!("shutting down");
    store.close().await;
    std::process::exit(0);
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
