//! # RoboMaster Hub
//!
//! Liga os listeners de push e de eventos a um `Mind` que registra tudo o
//! que chega, cada um em seu processo.
//!
//! ## Uso
//! ```bash
//! robomaster_hub            # usa config.toml ao lado do executável
//! RUST_LOG=debug robomaster_hub
//! ```

use robomaster_core::commander::{Commander, TcpCommander};
use robomaster_core::config::AppConfig;
use robomaster_core::records::TelemetryRecord;
use robomaster_hub::channel::{Inlet, channel};
use robomaster_hub::hub::Hub;
use robomaster_hub::listener::Listener;
use robomaster_hub::mind::Mind;
use robomaster_hub::worker::WorkerError;
use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Espera máxima por item em cada entrada, a cada passo do Mind.
const INLET_POLL: Duration = Duration::from_millis(20);

/// Assinaturas de push/eventos pedidas ao robô.
const SUBSCRIPTIONS: [&[&str]; 3] = [
    &["chassis", "push", "attitude", "on", "status", "on", "position", "on"],
    &["gimbal", "push", "attitude", "on"],
    &["armor", "event", "hit", "on"],
];

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config inválida: {e}");
        }
        return ExitCode::FAILURE;
    }

    let ip: IpAddr = match config.robot.ip.parse() {
        Ok(ip) => ip,
        Err(_) => {
            error!(
                "Configure [robot] ip em {} antes de iniciar",
                config_path.display()
            );
            return ExitCode::FAILURE;
        }
    };

    match run(config, ip) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: AppConfig, ip: IpAddr) -> Result<(), Box<dyn std::error::Error>> {
    let buffer = config.worker.channel_buffer_bytes;
    let (push_out, push_in) = channel::<TelemetryRecord>(buffer)?;
    let (event_out, event_in) = channel::<TelemetryRecord>(buffer)?;

    let hub = Hub::from_config(&config.hub);

    let cfg = config.clone();
    hub.register("push-listener", move |ctx| Listener::push(ctx, push_out, &cfg))?;

    let cfg = config.clone();
    hub.register("event-listener", move |ctx| {
        Listener::event(ctx, event_out, ip, &cfg)
    })?;

    let cfg = config;
    hub.register("mind", move |ctx| {
        let timeout = cfg.robot.command_timeout();
        let mut cmd = TcpCommander::connect(ip, cfg.ports.ctrl, timeout)?;
        for words in SUBSCRIPTIONS {
            let reply = cmd.send(words)?;
            info!("{} → {reply}", words.join(" "));
        }
        Mind::new(ctx, cmd, vec![push_in, event_in], log_records, true)
    })?;

    let report = hub.run()?;
    for child in &report.children {
        info!("{} (pid {}): {}", child.name, child.pid, child.exit);
    }
    Ok(())
}

fn log_records(
    _cmd: &mut TcpCommander,
    inlets: &mut [Inlet<TelemetryRecord>],
) -> Result<(), WorkerError> {
    for inlet in inlets.iter_mut() {
        if let Some(record) = inlet.recv_timeout(INLET_POLL)? {
            info!("{record:?}");
        }
    }
    Ok(())
}
