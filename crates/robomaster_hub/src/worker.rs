//! Worker – a unidade de trabalho executada em um processo próprio.
//!
//! Um [`Worker`] junta o estado de execução ([`Unit`]: nome, transporte,
//! canal de saída, flag de fechamento) com a lógica do usuário ([`Task`]).
//!
//! Ciclo de vida:
//!
//! ```text
//! build() ──▶ run() ──▶ step() … step() ──▶ close()
//!   │                     ▲ até o token fechar   │
//!   └ abre transporte     └ ou step único         └ libera transporte e saída
//! ```
//!
//! O fechamento é cooperativo: o [`CloseToken`] é marcado pelo sinal de
//! término e o loop só o observa entre dois `step()`.

use crate::channel::{self, ChannelError, Outlet};
use robomaster_core::commander::CommandError;
use robomaster_core::config::OUTLET_TIMEOUT;
use robomaster_core::decoder::DecodeError;
use serde::Serialize;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, info_span};

// ──────────────────────────────────────────────
// Erros
// ──────────────────────────────────────────────

/// Erros de um worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Nome do worker não pode ser vazio")]
    EmptyName,

    #[error("Worker sem transporte configurado")]
    NoTransport,

    #[error("Worker sem canal de saída")]
    NoOutlet,

    #[error("Fim do stream")]
    EndOfStream,

    #[error("Erro de transporte: {0}")]
    Transport(#[from] io::Error),

    #[error("Mensagem não é UTF-8 válido: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Fonte de vídeo: {0}")]
    FrameSource(String),

    #[error("Erro da tarefa: {0}")]
    Task(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl WorkerError {
    /// Embrulha um erro da lógica do usuário.
    pub fn task(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        WorkerError::Task(e.into())
    }
}

// ──────────────────────────────────────────────
// Token de fechamento
// ──────────────────────────────────────────────

/// Flag de fechamento compartilhada entre o loop e o tratamento de sinais.
///
/// Marcar é só um store atômico, seguro dentro de um handler de sinal.
#[derive(Debug, Clone, Default)]
pub struct CloseToken(Arc<AtomicBool>);

impl CloseToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marca como fechado. Retorna `true` só na primeira vez.
    pub fn close(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// O que uma factory recebe para construir seu worker.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    name: String,
    token: CloseToken,
}

impl WorkerContext {
    /// Contexto com um token novo, sem ligação com sinais.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_token(name, CloseToken::new())
    }

    pub fn with_token(name: impl Into<String>, token: CloseToken) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CloseToken {
        &self.token
    }
}

// ──────────────────────────────────────────────
// Transporte
// ──────────────────────────────────────────────

/// Como o worker fala com o robô.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    None,
    /// TCP, conecta no endereço remoto
    Stream,
    /// UDP, faz bind no endereço local
    Datagram,
}

enum Transport {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

impl Transport {
    fn open(
        mode: TransportMode,
        address: SocketAddr,
        timeout: Option<Duration>,
    ) -> io::Result<Option<Self>> {
        let transport = match mode {
            TransportMode::None => return Ok(None),
            TransportMode::Stream => {
                let conn = match timeout {
                    Some(t) => TcpStream::connect_timeout(&address, t)?,
                    None => TcpStream::connect(address)?,
                };
                conn.set_read_timeout(timeout)?;
                Transport::Stream(conn)
            }
            TransportMode::Datagram => {
                let sock = UdpSocket::bind(address)?;
                sock.set_read_timeout(timeout)?;
                Transport::Datagram(sock)
            }
        };
        Ok(Some(transport))
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        match self {
            Transport::Stream(conn) => conn.read(buf),
            Transport::Datagram(sock) => sock.recv(buf),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Stream(conn) => conn.local_addr(),
            Transport::Datagram(sock) => sock.local_addr(),
        }
    }

    fn shutdown(self) {
        if let Transport::Stream(conn) = self {
            let _ = conn.shutdown(Shutdown::Both);
        }
    }
}

// ──────────────────────────────────────────────
// Unit
// ──────────────────────────────────────────────

/// Estado de execução de um worker, entregue à [`Task`] a cada passo.
pub struct Unit<O> {
    name: String,
    address: Option<SocketAddr>,
    transport: Option<Transport>,
    out: Option<Outlet<O>>,
    token: CloseToken,
    outlet_timeout: Duration,
    released: bool,
}

impl<O> Unit<O> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endereço configurado (remoto para TCP, local para UDP).
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Endereço local efetivo do transporte, útil com porta 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(|t| t.local_addr().ok())
    }

    pub fn token(&self) -> &CloseToken {
        &self.token
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_closed()
    }

    pub fn has_outlet(&self) -> bool {
        self.out.is_some()
    }

    /// Lê até `max_bytes` do transporte (uma leitura = uma mensagem).
    ///
    /// - `Ok(None)`: timeout de leitura, ou worker já fechando
    /// - `Err(EndOfStream)`: conexão TCP encerrada pelo robô
    /// - `Err(Transport)`: falha de socket com o worker ainda ativo
    pub fn intake(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>, WorkerError> {
        if self.is_closed() {
            return Ok(None);
        }
        let transport = self.transport.as_mut().ok_or(WorkerError::NoTransport)?;
        let is_stream = matches!(transport, Transport::Stream(_));

        let mut buf = vec![0u8; max_bytes];
        match transport.recv(&mut buf) {
            Ok(0) if is_stream => {
                if self.is_closed() {
                    Ok(None)
                } else {
                    Err(WorkerError::EndOfStream)
                }
            }
            Ok(size) => {
                buf.truncate(size);
                Ok(Some(buf))
            }
            Err(e) if channel::is_timeout(&e) => Ok(None),
            Err(e) if self.is_closed() => {
                // Corrida esperada: o transporte foi liberado durante a leitura.
                debug!("Leitura interrompida pelo fechamento: {e}");
                Ok(None)
            }
            Err(e) => Err(WorkerError::Transport(e)),
        }
    }

    /// Libera transporte e saída. Retorna `true` só na primeira chamada.
    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.token.close();

        info!("Fechando worker {}...", self.name);
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
        self.out = None;
        true
    }
}

impl<O: Serialize> Unit<O> {
    /// Enfileira `item` na saída.
    ///
    /// Com a fila cheia tenta de novo a cada `outlet_timeout`, sem desistir,
    /// a menos que o worker feche: aí o item é descartado e retorna `Ok(false)`.
    pub fn outlet(&mut self, item: &O) -> Result<bool, WorkerError> {
        let out = self.out.as_ref().ok_or(WorkerError::NoOutlet)?;
        let frame = channel::encode(item)?;

        while !self.token.is_closed() {
            if out.send_frame(&frame, self.outlet_timeout)? {
                return Ok(true);
            }
        }

        debug!("Worker {} fechando, item descartado", self.name);
        Ok(false)
    }
}

// ──────────────────────────────────────────────
// Task + Worker
// ──────────────────────────────────────────────

/// Lógica de negócio de um worker.
pub trait Task {
    /// Tipo dos itens enviados pela saída (`()` se não houver).
    type Output;

    /// Um passo de trabalho. Chamado repetidamente no modo loop.
    fn step(&mut self, unit: &mut Unit<Self::Output>) -> Result<(), WorkerError>;

    /// Libera recursos próprios da tarefa (vídeo, conexão de comandos).
    fn release(&mut self) {}
}

/// Configura e constrói um [`Worker`].
pub struct WorkerBuilder<O> {
    ctx: WorkerContext,
    mode: TransportMode,
    address: Option<SocketAddr>,
    read_timeout: Option<Duration>,
    out: Option<Outlet<O>>,
    outlet_timeout: Duration,
    looping: bool,
}

impl<O> WorkerBuilder<O> {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            mode: TransportMode::None,
            address: None,
            read_timeout: None,
            out: None,
            outlet_timeout: OUTLET_TIMEOUT,
            looping: true,
        }
    }

    /// Transporte com o robô.
    pub fn link(mut self, mode: TransportMode, address: SocketAddr) -> Self {
        self.mode = mode;
        self.address = Some(address);
        self
    }

    /// Timeout de leitura (e de conexão TCP). Sem timeout, `intake` bloqueia.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn outlet(mut self, out: Outlet<O>) -> Self {
        self.out = Some(out);
        self
    }

    pub fn outlet_timeout(mut self, timeout: Duration) -> Self {
        self.outlet_timeout = timeout;
        self
    }

    /// `false` executa `step()` uma única vez.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Abre o transporte e monta o worker.
    pub fn build<T: Task<Output = O>>(self, task: T) -> Result<Worker<T>, WorkerError> {
        let WorkerContext { name, token } = self.ctx;
        if name.is_empty() {
            return Err(WorkerError::EmptyName);
        }

        let transport = match self.address {
            Some(address) => Transport::open(self.mode, address, self.read_timeout)?,
            None => None,
        };
        if self.mode != TransportMode::None {
            debug!("Worker {name}: {:?} em {:?}", self.mode, self.address);
        }

        Ok(Worker {
            unit: Unit {
                name,
                address: self.address,
                transport,
                out: self.out,
                token,
                outlet_timeout: self.outlet_timeout,
                released: false,
            },
            task,
            looping: self.looping,
        })
    }
}

/// Unidade de trabalho pronta para rodar.
pub struct Worker<T: Task> {
    unit: Unit<T::Output>,
    task: T,
    looping: bool,
}

impl<T: Task> Worker<T> {
    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn unit(&self) -> &Unit<T::Output> {
        &self.unit
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn is_closed(&self) -> bool {
        self.unit.is_closed()
    }

    /// Ponto de entrada do processo. Sempre fecha o worker ao sair.
    ///
    /// `EndOfStream` com o worker já fechando é a corrida normal do
    /// desligamento e é engolido. Qualquer outro erro é propagado.
    pub fn run(mut self) -> Result<(), WorkerError> {
        let span = info_span!("worker", name = %self.unit.name);
        let _enter = span.enter();
        info!("Worker iniciado (loop: {})", self.looping);

        let result = self.drive();
        let closing = self.unit.is_closed();
        self.close();

        match result {
            Err(WorkerError::EndOfStream) if closing => {
                debug!("Fim do stream durante o fechamento");
                Ok(())
            }
            Err(e) => {
                error!("Worker falhou: {e}");
                Err(e)
            }
            Ok(()) => {
                info!("Worker encerrado");
                Ok(())
            }
        }
    }

    /// Um único `step()`, fora do loop.
    #[cfg(test)]
    pub(crate) fn step_once(&mut self) -> Result<(), WorkerError> {
        self.task.step(&mut self.unit)
    }

    fn drive(&mut self) -> Result<(), WorkerError> {
        if !self.looping {
            return self.task.step(&mut self.unit);
        }
        while !self.unit.is_closed() {
            self.task.step(&mut self.unit)?;
        }
        Ok(())
    }

    /// Fecha o worker. Idempotente.
    pub fn close(&mut self) {
        if self.unit.release() {
            self.task.release();
        }
    }
}

impl<T: Task> Drop for Worker<T> {
    fn drop(&mut self) {
        self.close();
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
