//! Cada processo filho só mantém as próprias pontas de canal.
//!
//! Fica em um binário de teste próprio: outros testes fazendo `fork` ao
//! mesmo tempo herdariam as pontas registradas aqui.

use crossbeam_channel::bounded;
use robomaster_hub::channel::channel;
use robomaster_hub::hub::{ChildExit, Hub};
use robomaster_hub::worker::{Task, Unit, Worker, WorkerBuilder, WorkerError};
use signal_hook::consts::SIGTERM;
use std::thread;
use std::time::Duration;

/// Enfileira sem parar.
struct Producer;

impl Task for Producer {
    type Output = u64;

    fn step(&mut self, unit: &mut Unit<u64>) -> Result<(), WorkerError> {
        unit.outlet(&7)?;
        Ok(())
    }
}

#[test]
fn earlier_producer_sees_consumer_exit() {
    let (out, inlet) = channel::<u64>(4096).unwrap();

    let hub = Hub::with_deadline(Duration::from_secs(5));
    hub.register("producer", move |ctx| {
        WorkerBuilder::new(ctx).outlet(out).build(Producer)
    })
    .unwrap();
    hub.register("consumer", move |_ctx| -> Result<Worker<Producer>, WorkerError> {
        drop(inlet);
        Err(WorkerError::task("consumidor saiu"))
    })
    .unwrap();

    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(1500));
        let _ = tx.send(SIGTERM);
    });
    let report = hub.run_until(&rx).unwrap();

    assert_eq!(report.get("consumer").unwrap().exit, ChildExit::Exited(1));
    // Sem outra cópia do Inlet viva, o envio falha e o produtor termina sozinho.
    assert_eq!(report.get("producer").unwrap().exit, ChildExit::Exited(1));
}
