//! `Hub::run` com um SIGTERM de verdade.
//!
//! O sinal vai para o processo de teste inteiro, por isso este é o único
//! teste deste binário.

use robomaster_hub::hub::{ChildExit, Hub};
use robomaster_hub::worker::{Task, Unit, WorkerBuilder, WorkerError};
use std::thread;
use std::time::{Duration, Instant};

struct Idle;

impl Task for Idle {
    type Output = ();

    fn step(&mut self, _unit: &mut Unit<()>) -> Result<(), WorkerError> {
        thread::sleep(Duration::from_millis(10));
        Ok(())
    }
}

/// Ignora o fechamento.
struct Stubborn;

impl Task for Stubborn {
    type Output = ();

    fn step(&mut self, _unit: &mut Unit<()>) -> Result<(), WorkerError> {
        loop {
            thread::sleep(Duration::from_millis(10));
        }
    }
}

#[test]
fn sigterm_stops_run_within_the_deadline() {
    let deadline = Duration::from_secs(1);
    let hub = Hub::with_deadline(deadline);
    hub.register("idle", |ctx| WorkerBuilder::new(ctx).build(Idle))
        .unwrap();
    hub.register("stubborn", |ctx| WorkerBuilder::new(ctx).build(Stubborn))
        .unwrap();

    let (sent_tx, sent_rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        // SAFETY: só envia SIGTERM para o próprio processo, que já tem o
        // handler do hub registrado.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
        let _ = sent_tx.send(Instant::now());
    });

    let report = hub.run().unwrap();
    let returned = Instant::now();
    let sent = sent_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let shutdown = returned.saturating_duration_since(sent);
    assert!(
        shutdown < deadline + Duration::from_secs(2),
        "run levou {shutdown:?} após o sinal"
    );
    assert_eq!(report.started(), 2);
    assert_eq!(report.get("idle").unwrap().exit, ChildExit::Exited(0));
    assert_eq!(report.get("stubborn").unwrap().exit, ChildExit::Killed);
}
