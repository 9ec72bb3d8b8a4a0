//! Listeners de telemetria: escutam o robô e enfileiram registros decodificados.
//!
//! - Push (UDP, porta 40924): chassis e gimbal
//! - Eventos (TCP, porta 40925): armor e sound
//!
//! Cada leitura de socket é uma mensagem; cada cláusula vira um registro, na
//! ordem em que aparece.

use crate::channel::Outlet;
use crate::worker::{Task, TransportMode, Unit, Worker, WorkerBuilder, WorkerContext, WorkerError};
use robomaster_core::config::{AppConfig, WorkerConfig};
use robomaster_core::decoder::{self, EVENT_GRAMMAR, Grammar, PUSH_GRAMMAR};
use robomaster_core::records::TelemetryRecord;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, info};

/// Qual stream o listener escuta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Push,
    Event,
}

impl StreamKind {
    fn grammar(self) -> &'static Grammar {
        match self {
            StreamKind::Push => &PUSH_GRAMMAR,
            StreamKind::Event => &EVENT_GRAMMAR,
        }
    }
}

/// Decodifica o stream e repassa cada registro para a saída.
#[derive(Debug)]
pub struct Listener {
    kind: StreamKind,
    buf_size: usize,
}

impl Listener {
    pub fn new(kind: StreamKind, buf_size: usize) -> Self {
        Self { kind, buf_size }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Listener de push: UDP em `0.0.0.0:<porta push>`.
    pub fn push(
        ctx: WorkerContext,
        out: Outlet<TelemetryRecord>,
        config: &AppConfig,
    ) -> Result<Worker<Self>, WorkerError> {
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.ports.push);
        Self::push_on(ctx, out, bind, &config.worker)
    }

    /// Listener de push em um endereço local qualquer.
    pub fn push_on(
        ctx: WorkerContext,
        out: Outlet<TelemetryRecord>,
        bind: SocketAddr,
        config: &WorkerConfig,
    ) -> Result<Worker<Self>, WorkerError> {
        info!("Listener de push escutando em {bind}");
        Self::build(ctx, out, StreamKind::Push, TransportMode::Datagram, bind, config)
    }

    /// Listener de eventos: TCP para `<ip>:<porta eventos>`.
    pub fn event(
        ctx: WorkerContext,
        out: Outlet<TelemetryRecord>,
        ip: IpAddr,
        config: &AppConfig,
    ) -> Result<Worker<Self>, WorkerError> {
        let remote = SocketAddr::new(ip, config.ports.event);
        Self::event_on(ctx, out, remote, &config.worker)
    }

    pub fn event_on(
        ctx: WorkerContext,
        out: Outlet<TelemetryRecord>,
        remote: SocketAddr,
        config: &WorkerConfig,
    ) -> Result<Worker<Self>, WorkerError> {
        info!("Listener de eventos conectando em {remote}");
        Self::build(ctx, out, StreamKind::Event, TransportMode::Stream, remote, config)
    }

    fn build(
        ctx: WorkerContext,
        out: Outlet<TelemetryRecord>,
        kind: StreamKind,
        mode: TransportMode,
        address: SocketAddr,
        config: &WorkerConfig,
    ) -> Result<Worker<Self>, WorkerError> {
        // O timeout de leitura é o "tick" em que o loop enxerga o fechamento.
        WorkerBuilder::new(ctx)
            .link(mode, address)
            .read_timeout(config.poll_interval())
            .outlet(out)
            .outlet_timeout(config.outlet_timeout())
            .build(Listener::new(kind, config.buffer_size))
    }
}

impl Task for Listener {
    type Output = TelemetryRecord;

    fn step(&mut self, unit: &mut Unit<TelemetryRecord>) -> Result<(), WorkerError> {
        let Some(bytes) = unit.intake(self.buf_size)? else {
            return Ok(());
        };
        let message = std::str::from_utf8(&bytes)?;
        let records = decoder::decode(self.kind.grammar(), message)?;
        debug!("{} registros de {:?}", records.len(), self.kind);

        for record in &records {
            if !unit.outlet(record)? {
                break;
            }
        }
        Ok(())
    }
}
