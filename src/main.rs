//! Input method service - main entry point.
//!
//! Hosts one `Service` on an in-process bus served over TCP. With an export
//! address, engines are exported on a second bus served at that address.

use clap::Parser;
use input_method_service::bus::{BusConnection, BusDirectory, LocalBus};
use input_method_service::ipc::IpcServer;
use input_method_service::{Config, Engine, EngineHandler, Service};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "input-method-service",
    about = "Input method engine service over a TCP message bus"
)]
struct Cli {
    /// JSON configuration file. Flags below override its values.
    #[arg(long, env = "IMS_CONFIG")]
    config: Option<PathBuf>,

    /// Address the service bus listens on.
    #[arg(long, env = "IMS_LISTEN_ADDR")]
    listen: Option<SocketAddr>,

    /// Address of a dedicated bus engines are exported on.
    #[arg(long, env = "IMS_EXPORT_ADDRESS")]
    export_address: Option<String>,

    /// Application id engine object paths derive from.
    #[arg(long, env = "IMS_APPLICATION_ID")]
    application_id: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

/// Demo engine: commits "Hello!" when the `a` key (keycode 38) goes down.
struct HelloEngine;

impl EngineHandler for HelloEngine {
    fn key_event(&self, engine: &Engine, keycode: u32, pressed: bool) -> bool {
        if keycode != 38 || !pressed {
            return false;
        }
        if let Err(e) = engine.commit("Hello!") {
            tracing::warn!("commit_failed: {}", e);
        }
        true
    }
}

fn load_config(cli: &Cli) -> input_method_service::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen.to_string();
    }
    if let Some(address) = &cli.export_address {
        config.service.export_address = Some(address.clone());
    }
    if let Some(application_id) = &cli.application_id {
        config.service.application_id = application_id.clone();
    }
    config.observability.json_logs |= cli.json_logs;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    input_method_service::observability::init_tracing(&config.observability);

    let bus = LocalBus::new();
    let directory = BusDirectory::new();
    let mut servers = vec![Arc::new(IpcServer::new(
        bus.clone(),
        config.server.listen_addr.parse()?,
        config.ipc.clone(),
    ))];

    if let Some(address) = config.service.export_address() {
        let export_bus = LocalBus::new();
        directory.listen(address, export_bus.clone());
        servers.push(Arc::new(IpcServer::new(
            export_bus,
            address.parse()?,
            config.ipc.clone(),
        )));
        tracing::info!("Engines exported on dedicated bus at {}", address);
    }

    let factory = Arc::new(|client_id: &input_method_service::types::ClientId| {
        Some(Engine::new(client_id.clone()).with_handler(HelloEngine))
    });
    let service = Service::with_dialer(config.service.clone(), factory, Arc::new(directory))?;

    let (connection, _signals) = bus.connect();
    let connection: Arc<dyn BusConnection> = Arc::new(connection);
    service.register(connection);
    service.activate();

    let mut tasks = tokio::task::JoinSet::new();
    for server in &servers {
        let server = server.clone();
        tasks.spawn(async move { server.serve().await });
    }

    tracing::info!(
        "Input method service starting (application_id={}, listen={})",
        config.service.application_id,
        config.server.listen_addr
    );

    tokio::select! {
        _ = service.hold().wait_idle(config.service.inactivity_timeout) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
        Some(result) = tasks.join_next() => {
            if let Ok(Err(e)) = result {
                tracing::error!("IPC server failed: {}", e);
            }
        }
    }

    service.shutdown();
    for server in &servers {
        server.shutdown();
    }
    while tasks.join_next().await.is_some() {}
    tracing::info!("Input method service stopped");
    Ok(())
}
