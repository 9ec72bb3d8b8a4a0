//! Hub – supervisor de processos.
//!
//! Cada worker registrado roda em um processo filho próprio (`fork`).
//! O hub só enxerga os processos, nunca a lógica dentro deles:
//!
//! ```text
//!            ┌──────────────┐  SIGINT/SIGTERM
//!            │     Hub      │◀──────────────── operador
//!            └──────┬───────┘
//!        fork  ┌────┼────┐   SIGTERM → espera com prazo → SIGKILL
//!              ▼    ▼    ▼
//!           worker worker worker
//! ```
//!
//! O prazo do desligamento é compartilhado: um filho lento consome o tempo
//! dos que vêm depois dele na ordem de registro.

use crate::signal;
use crate::worker::{CloseToken, Task, Worker, WorkerContext, WorkerError};
use crossbeam_channel::Receiver;
use robomaster_core::config::{HubConfig, SHUTDOWN_DEADLINE};
use std::fmt;
use std::io;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Intervalo entre verificações de um filho durante a espera.
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Código de saída de um filho cujo worker entrou em pânico.
///
/// Com `panic = "abort"` (perfil release) o filho morre por SIGABRT e o
/// relatório mostra `Signaled(6)`.
pub const PANIC_EXIT_CODE: i32 = 101;

// ──────────────────────────────────────────────
// Erros
// ──────────────────────────────────────────────

/// Erros de uso do hub, sempre detectados antes de qualquer processo subir
/// (exceto `Spawn`).
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Hub já foi fechado")]
    Closed,

    #[error("Hub já está rodando")]
    AlreadyStarted,

    #[error("Nome do worker não pode ser vazio")]
    EmptyName,

    #[error("Já existe um worker chamado {0:?}")]
    DuplicateName(String),

    #[error("Nenhum worker registrado")]
    NoWorkers,

    #[error("Falha ao iniciar o processo de {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Falha ao registrar sinais: {0}")]
    Signals(#[source] io::Error),
}

// ──────────────────────────────────────────────
// Relatório
// ──────────────────────────────────────────────

/// Como um processo filho terminou.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Saiu sozinho com este código
    Exited(i32),
    /// Morto por um sinal que não foi o SIGKILL do hub
    Signaled(i32),
    /// Não terminou no prazo e levou SIGKILL
    Killed,
    /// Não foi possível saber (waitpid falhou)
    Lost,
}

impl ChildExit {
    pub fn is_success(&self) -> bool {
        matches!(self, ChildExit::Exited(0))
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildExit::Exited(code) => write!(f, "saiu com código {code}"),
            ChildExit::Signaled(sig) => write!(f, "morto pelo sinal {sig}"),
            ChildExit::Killed => write!(f, "forçado (SIGKILL)"),
            ChildExit::Lost => write!(f, "estado perdido"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildReport {
    pub name: String,
    pub pid: i32,
    pub exit: ChildExit,
}

/// Resultado do desligamento, um item por processo iniciado.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub children: Vec<ChildReport>,
}

impl ShutdownReport {
    pub fn started(&self) -> usize {
        self.children.len()
    }

    /// Filhos que terminaram dentro do prazo.
    pub fn graceful(&self) -> usize {
        self.children
            .iter()
            .filter(|c| !matches!(c.exit, ChildExit::Killed | ChildExit::Lost))
            .count()
    }

    /// Filhos que precisaram de SIGKILL.
    pub fn terminated(&self) -> usize {
        self.children
            .iter()
            .filter(|c| c.exit == ChildExit::Killed)
            .count()
    }

    pub fn get(&self, name: &str) -> Option<&ChildReport> {
        self.children.iter().find(|c| c.name == name)
    }
}

// ──────────────────────────────────────────────
// Processo filho
// ──────────────────────────────────────────────

type Entry = Box<dyn FnOnce(WorkerContext) -> Result<(), WorkerError> + Send>;

struct Registration {
    name: String,
    entry: Entry,
}

/// Handle de um processo filho no lado do hub.
struct Child {
    name: String,
    pid: libc::pid_t,
    exit: Option<ChildExit>,
}

impl Child {
    /// `fork` + entrada do worker no filho. Só retorna no pai.
    ///
    /// `rest` são os registros ainda não iniciados: o filho os descarta antes
    /// de rodar, para não herdar as pontas de canal dos outros workers.
    fn spawn(
        reg: Registration,
        rest: &mut impl Iterator<Item = Registration>,
    ) -> io::Result<Child> {
        // SAFETY: o filho só constrói e roda o worker e termina com
        // `process::exit`, sem voltar ao código do pai.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(io::Error::last_os_error()),
            0 => {
                rest.for_each(drop);
                child_main(reg.name, reg.entry)
            }
            pid => {
                info!("Worker {} iniciado (pid {pid})", reg.name);
                Ok(Child {
                    name: reg.name,
                    pid,
                    exit: None,
                })
            }
        }
    }

    /// `waitpid` sem bloquear. `true` se o filho já terminou.
    fn poll(&mut self) -> bool {
        if self.exit.is_some() {
            return true;
        }
        let mut status: c_int = 0;
        // SAFETY: pid é um filho deste processo ainda não coletado.
        let rc = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        match rc {
            0 => false,
            -1 => {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    return false;
                }
                warn!(
                    "[vazamento de recurso] waitpid({}) de {} falhou: {e}",
                    self.pid, self.name
                );
                self.exit = Some(ChildExit::Lost);
                true
            }
            _ => {
                self.exit = Some(decode_status(status));
                true
            }
        }
    }

    /// Espera o filho terminar até `deadline` (`None`: sem limite).
    fn join(&mut self, deadline: Option<Instant>) -> bool {
        loop {
            if self.poll() {
                return true;
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    JOIN_POLL.min(deadline - now)
                }
                None => JOIN_POLL,
            };
            thread::sleep(pause);
        }
    }

    fn signal(&self, sig: c_int) {
        if self.exit.is_some() {
            return;
        }
        // SAFETY: kill só envia um sinal; o pid ainda não foi coletado.
        if unsafe { libc::kill(self.pid, sig) } == -1 {
            debug!(
                "kill({}, {sig}) de {}: {}",
                self.pid,
                self.name,
                io::Error::last_os_error()
            );
        }
    }

    /// SIGKILL e coleta bloqueante.
    fn terminate(&mut self) {
        if self.poll() {
            return;
        }
        warn!("Worker {} não terminou no prazo, forçando", self.name);
        self.signal(libc::SIGKILL);

        let mut status: c_int = 0;
        loop {
            // SAFETY: mesmo pid, agora esperando sem WNOHANG.
            let rc = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if rc != -1 {
                self.exit = Some(match decode_status(status) {
                    ChildExit::Signaled(libc::SIGKILL) => ChildExit::Killed,
                    // Terminou sozinho entre o poll e o kill.
                    other => other,
                });
                return;
            }
            let e = io::Error::last_os_error();
            if e.kind() != io::ErrorKind::Interrupted {
                warn!(
                    "[vazamento de recurso] Não foi possível coletar {} (pid {}): {e}",
                    self.name, self.pid
                );
                self.exit = Some(ChildExit::Lost);
                return;
            }
        }
    }

    fn report(&self) -> ChildReport {
        ChildReport {
            name: self.name.clone(),
            pid: self.pid,
            exit: self.exit.unwrap_or(ChildExit::Lost),
        }
    }
}

fn decode_status(status: c_int) -> ChildExit {
    if libc::WIFEXITED(status) {
        ChildExit::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        ChildExit::Signaled(libc::WTERMSIG(status))
    } else {
        ChildExit::Lost
    }
}

/// Corpo do processo filho: liga o token aos sinais, roda o worker, sai.
fn child_main(name: String, entry: Entry) -> ! {
    let token = CloseToken::new();
    let code = match signal::close_on_termination(&token) {
        Err(e) => {
            error!("Worker {name}: falha ao registrar sinais: {e}");
            1
        }
        Ok(()) => {
            let ctx = WorkerContext::with_token(name.clone(), token);
            match panic::catch_unwind(AssertUnwindSafe(move || entry(ctx))) {
                Ok(Ok(())) => 0,
                Ok(Err(e)) => {
                    error!("Worker {name} terminou com erro: {e}");
                    1
                }
                Err(_) => {
                    error!("Worker {name} entrou em pânico");
                    PANIC_EXIT_CODE
                }
            }
        }
    };
    std::process::exit(code)
}

// ──────────────────────────────────────────────
// Hub
// ──────────────────────────────────────────────

#[derive(Default)]
struct HubState {
    closed: bool,
    started: bool,
    pending: Vec<Registration>,
    children: Vec<Child>,
}

/// Supervisor: registra workers, sobe um processo por worker e cuida do
/// desligamento.
pub struct Hub {
    state: Mutex<HubState>,
    deadline: Duration,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::with_deadline(SHUTDOWN_DEADLINE)
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            deadline,
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::with_deadline(config.shutdown_deadline())
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Quantidade de workers registrados.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.pending.len() + state.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registra um worker. Nada é iniciado aqui.
    ///
    /// A `factory` roda dentro do processo filho: recebe o contexto (nome +
    /// token ligado aos sinais) e constrói o worker, que então é executado.
    pub fn register<F, T>(&self, name: impl Into<String>, factory: F) -> Result<(), HubError>
    where
        F: FnOnce(WorkerContext) -> Result<Worker<T>, WorkerError> + Send + 'static,
        T: Task + 'static,
    {
        let name = name.into();
        let mut state = self.lock();
        if state.closed {
            return Err(HubError::Closed);
        }
        if state.started {
            return Err(HubError::AlreadyStarted);
        }
        if name.is_empty() {
            return Err(HubError::EmptyName);
        }
        if state.pending.iter().any(|r| r.name == name) {
            return Err(HubError::DuplicateName(name));
        }

        debug!("Worker {name} registrado");
        state.pending.push(Registration {
            name,
            entry: Box::new(move |ctx| factory(ctx)?.run()),
        });
        Ok(())
    }

    /// Sobe os workers e bloqueia até SIGINT/SIGTERM, depois desliga.
    pub fn run(&self) -> Result<ShutdownReport, HubError> {
        {
            let state = self.lock();
            if state.closed {
                return Err(HubError::Closed);
            }
            if state.pending.is_empty() && !state.started {
                return Err(HubError::NoWorkers);
            }
        }
        let bridge = signal::bridge().map_err(HubError::Signals)?;
        info!("Ctrl+C para encerrar");
        self.run_until(bridge.receiver())
    }

    /// Como [`run`](Self::run), mas o gatilho do desligamento é qualquer
    /// mensagem (ou desconexão) em `shutdown`.
    pub fn run_until(&self, shutdown: &Receiver<c_int>) -> Result<ShutdownReport, HubError> {
        self.start()?;

        match shutdown.recv() {
            Ok(sig) => info!("Sinal {sig}: desligando hub"),
            Err(_) => info!("Gatilho de desligamento descartado: desligando hub"),
        }

        Ok(self.close().unwrap_or_default())
    }

    fn start(&self) -> Result<(), HubError> {
        let mut state = self.lock();
        if state.closed {
            return Err(HubError::Closed);
        }
        if state.started {
            return Err(HubError::AlreadyStarted);
        }
        if state.pending.is_empty() {
            return Err(HubError::NoWorkers);
        }
        state.started = true;

        let mut pending = std::mem::take(&mut state.pending).into_iter();
        info!("Iniciando {} workers", pending.len());
        while let Some(reg) = pending.next() {
            let name = reg.name.clone();
            // No pai, `reg` (e as pontas de canal que a factory capturou) é
            // descartado logo após o fork.
            match Child::spawn(reg, &mut pending) {
                Ok(child) => state.children.push(child),
                Err(source) => {
                    error!("Falha ao iniciar {name}: {source}");
                    drop(state);
                    self.close();
                    return Err(HubError::Spawn { name, source });
                }
            }
        }
        Ok(())
    }

    /// Desliga o hub. Idempotente: só a primeira chamada devolve o relatório.
    ///
    /// SIGTERM para todos os filhos, espera cada um com o tempo que resta do
    /// prazo, SIGKILL em quem sobrar.
    pub fn close(&self) -> Option<ShutdownReport> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        state.pending.clear();

        if state.children.is_empty() {
            return Some(ShutdownReport::default());
        }

        info!(
            "Encerrando {} workers (prazo {:.1}s)...",
            state.children.len(),
            self.deadline.as_secs_f64()
        );
        for child in &state.children {
            child.signal(libc::SIGTERM);
        }

        // Prazo grande demais para um Instant: espera sem limite.
        let deadline = Instant::now().checked_add(self.deadline);
        for child in state.children.iter_mut() {
            if !child.join(deadline) {
                child.terminate();
            }
        }

        let report = ShutdownReport {
            children: state.children.iter().map(Child::report).collect(),
        };
        for child in &report.children {
            if child.exit.is_success() {
                debug!("Worker {} (pid {}) {}", child.name, child.pid, child.exit);
            } else {
                warn!("Worker {} (pid {}) {}", child.name, child.pid, child.exit);
            }
        }
        info!(
            "Hub encerrado: {} no prazo, {} forçados",
            report.graceful(),
            report.terminated()
        );
        Some(report)
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.close();
    }
}
