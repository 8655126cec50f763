// Copyright (C) 2025 Preview Platform Team (platform@drape.dev)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// ----------------------
//  Module declarations
// ----------------------
// Internal modules: VM pool, cache fabric, sync, detector, orchestrator,
// gateway, observability and the HTTP surface wiring them all together.
mod agent;
mod cache;
mod config;
mod detector;
mod error;
mod gateway;
mod http;
mod model;
mod observability;
mod orchestrator;
mod pool;
mod project_store;
mod provider;
mod session;
mod storage;
mod sync;

// ----------------------
// External dependencies
// ----------------------
use hyper::Server;
use std::net::SocketAddr;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::gateway::GatewayState;
use crate::http::{build_admin_router, build_gateway_router, AdminState, PreviewApiState};
use crate::orchestrator::Orchestrator;
use crate::pool::Pool;
use crate::provider::HttpProviderClient;
use crate::session::SessionRegistry;
use tokio_util::sync::CancellationToken;

/// ----------------------------
/// CLI ARGUMENT STRUCTURE
/// ----------------------------
/// Defines CLI arguments that can be passed to the binary, such as the path
/// to the configuration file. Defaults to "config.yaml" if not provided.
#[derive(Parser, Debug)]
#[command(
    name = "preview-core",
    version = "0.1.0",
    author = "Preview Platform Team <platform@drape.dev>",
    about = "Ephemeral preview VM orchestrator",
    long_about = Some(
        "Provisions ephemeral preview VMs, syncs project files into them, \
        restores dependencies through a tiered cache fabric, and exposes the \
        resulting dev server through a gateway.\n\n\
        Author: Preview Platform Team <platform@drape.dev>\n\
        Version: 0.1.0"
    )
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

/// ----------------------------
/// LOGGING INITIALIZATION
/// ----------------------------
/// Initializes structured logging using the `LOG_LEVEL` environment
/// variable. Falls back to "info" if not set.
fn init_logging(app_id: &str) {
    let filter = EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("logging initialized for app_id: {app_id}");
}

/// Watches for SIGHUP and reloads `config_path` into the shared config slot
/// on each signal, leaving the previous config in effect on a failed reload
/// (§2.1).
fn spawn_config_reload_watcher(config_path: String, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("failed to install SIGHUP handler: {}", e);
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = hangup.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    if let Err(e) = config::reload(&config_path) {
                        error!("config reload from '{}' failed: {}", config_path, e);
                    }
                }
            }
        }
    });
}

/// ---------------------------
/// APPLICATION ENTRY POINT
/// ---------------------------
#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    // 1. Parse CLI arguments (e.g. --config=config.prod.yaml).
    let args = Args::parse();

    // 2. Load configuration from YAML file.
    let loaded = match Config::from_file(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config from '{}': {e}", args.config);
            exit(1);
        }
    };

    // 3. Initialize the logger, then install the Prometheus recorder.
    init_logging(&loaded.app_id);
    let metrics_handle = Arc::new(observability::install_recorder());

    // 4. Install the global config slot.
    config::install(loaded);
    let cfg = config::current();

    // 5. Build the provider client, VM pool, orchestrator and session
    //    registry, then adopt any already-running pool VMs (e.g. after a
    //    restart) before accepting traffic.
    let provider = Arc::new(HttpProviderClient::new(cfg.provider_api_base_url.clone()));
    let pool = Arc::new(Pool::new(
        provider.clone(),
        cfg.agent_base_url.clone(),
        cfg.vm_image.clone(),
        cfg.vm_region.clone(),
    ));
    if let Err(e) = pool.adopt().await {
        warn!("pool adoption failed, starting from an empty pool: {}", e);
    }

    let orchestrator = Arc::new(Orchestrator::new(pool.clone(), provider.clone(), cfg.agent_base_url.clone()));
    let registry = Arc::new(SessionRegistry::new(orchestrator));

    // 6. Spawn background tasks: pool replenisher, idle-session reaper, and
    //    the per-VM resource monitor. All share one shutdown signal.
    let shutdown = CancellationToken::new();
    pool.clone().spawn_replenisher(shutdown.clone());
    registry.clone().spawn_reaper(shutdown.clone());
    observability::resource::spawn_monitor(pool.clone(), cfg.agent_base_url.clone(), shutdown.clone());
    spawn_config_reload_watcher(args.config.clone(), shutdown.clone());

    // 7. Build the two routers: public gateway/preview-API traffic, and
    //    admin + metrics, each bound to its own port (§6).
    let gateway_router = build_gateway_router(
        PreviewApiState {
            registry: registry.clone(),
            pool: pool.clone(),
        },
        Arc::new(GatewayState {
            registry: registry.clone(),
            agent_base_url: cfg.agent_base_url.clone(),
        }),
    );
    let admin_router = build_admin_router(AdminState {
        registry: registry.clone(),
        pool: pool.clone(),
        metrics: metrics_handle,
    });

    let gateway_addr = SocketAddr::from(([0, 0, 0, 0], cfg.gateway_port));
    let admin_addr = SocketAddr::from(([0, 0, 0, 0], cfg.admin_port));

    info!("gateway listening at http://{}", gateway_addr);
    info!("admin + metrics listening at http://{}", admin_addr);

    // 8. Start both servers concurrently.
    let gateway_server = Server::bind(&gateway_addr).serve(gateway_router.into_make_service());
    let admin_server = Server::bind(&admin_addr).serve(admin_router.into_make_service());

    let (gateway_result, admin_result) = tokio::join!(gateway_server, admin_server);
    shutdown.cancel();

    if let Err(e) = gateway_result {
        error!("gateway server exited with error: {}", e);
    }
    if let Err(e) = admin_result {
        error!("admin server exited with error: {}", e);
    }
}
