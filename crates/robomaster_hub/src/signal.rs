//! Sinais de término (SIGINT/SIGTERM).
//!
//! No hub, uma thread dedicada recebe os sinais e os repassa por um canal
//! crossbeam, para o `run` bloquear sem fazer nada dentro de um handler.
//! Nos filhos, o sinal só marca o [`CloseToken`] do worker.

use crate::worker::CloseToken;
use crossbeam_channel::{Receiver, bounded};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::io;
use std::os::raw::c_int;
use std::thread;
use tracing::{debug, info};

/// Sinais que iniciam o desligamento.
pub const TERMINATION_SIGNALS: [c_int; 2] = [SIGINT, SIGTERM];

/// Ponte sinal → canal. Desregistra os handlers ao ser descartada.
pub struct SignalBridge {
    rx: Receiver<c_int>,
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalBridge {
    /// Canal que recebe cada sinal de término.
    pub fn receiver(&self) -> &Receiver<c_int> {
        &self.rx
    }
}

/// Registra os handlers de SIGINT/SIGTERM e inicia a thread de repasse.
pub fn bridge() -> io::Result<SignalBridge> {
    let mut signals = Signals::new(TERMINATION_SIGNALS)?;
    let handle = signals.handle();
    let (tx, rx) = bounded(1);

    let thread = thread::Builder::new()
        .name("signal-bridge".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                info!("Sinal {sig} recebido");
                // Um sinal pendente já basta para acordar o hub.
                let _ = tx.try_send(sig);
            }
            debug!("Ponte de sinais encerrada");
        })?;

    Ok(SignalBridge {
        rx,
        handle,
        thread: Some(thread),
    })
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// No processo filho: SIGINT/SIGTERM marcam o token de fechamento.
pub fn close_on_termination(token: &CloseToken) -> io::Result<()> {
    for sig in TERMINATION_SIGNALS {
        signal_hook::flag::register(sig, token.flag())?;
    }
    Ok(())
}
