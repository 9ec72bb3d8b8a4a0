//! Mind – controlador sem estado.
//!
//! Lê dos canais de entrada (saídas dos listeners) e comanda o robô.
//! Para controle com estado, implemente [`Task`] diretamente.

use crate::channel::Inlet;
use crate::worker::{Task, Unit, Worker, WorkerBuilder, WorkerContext, WorkerError};
use robomaster_core::commander::Commander;
use tracing::debug;

/// Chama `processing(commander, inlets)` a cada passo.
pub struct Mind<C, I, P> {
    commander: C,
    inlets: Vec<Inlet<I>>,
    processing: P,
}

impl<C, I, P> Mind<C, I, P>
where
    C: Commander,
    P: FnMut(&mut C, &mut [Inlet<I>]) -> Result<(), WorkerError>,
{
    /// `looping = false` chama o `processing` uma única vez.
    pub fn new(
        ctx: WorkerContext,
        commander: C,
        inlets: Vec<Inlet<I>>,
        processing: P,
        looping: bool,
    ) -> Result<Worker<Self>, WorkerError> {
        debug!(
            "Mind {} com {} entradas, robô em {}",
            ctx.name(),
            inlets.len(),
            commander.connected_address()
        );
        WorkerBuilder::new(ctx).looping(looping).build(Mind {
            commander,
            inlets,
            processing,
        })
    }

    pub fn commander(&self) -> &C {
        &self.commander
    }
}

impl<C, I, P> Task for Mind<C, I, P>
where
    C: Commander,
    P: FnMut(&mut C, &mut [Inlet<I>]) -> Result<(), WorkerError>,
{
    type Output = ();

    fn step(&mut self, _unit: &mut Unit<()>) -> Result<(), WorkerError> {
        (self.processing)(&mut self.commander, &mut self.inlets)
    }

    fn release(&mut self) {
        self.commander.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use robomaster_core::commander::{CommandError, command_line};
    use std::net::SocketAddr;
    use std::time::Duration;

    /// Commander falso: guarda as linhas enviadas.
    #[derive(Default)]
    struct Recorder {
        sent: Vec<String>,
        closed: bool,
    }

    impl Commander for Recorder {
        fn send(&mut self, words: &[&str]) -> Result<String, CommandError> {
            if self.closed {
                return Err(CommandError::Closed);
            }
            self.sent.push(command_line(words)?);
            Ok("ok".into())
        }

        fn connected_address(&self) -> SocketAddr {
            "192.168.2.1:40923".parse().unwrap()
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn single_shot_commands_once_per_input() {
        let (out, inlet) = channel::<i32>(0).unwrap();
        out.send_timeout(&3, Duration::from_millis(10)).unwrap();
        out.send_timeout(&-2, Duration::from_millis(10)).unwrap();

        let mut worker = Mind::new(
            WorkerContext::new("mind"),
            Recorder::default(),
            vec![inlet],
            |cmd: &mut Recorder, inlets: &mut [Inlet<i32>]| {
                for item in inlets[0].drain()? {
                    let speed = item.to_string();
                    cmd.send(&["chassis", "speed", "x", &speed])?;
                }
                Ok(())
            },
            false,
        )
        .unwrap();

        worker.step_once().unwrap();
        assert_eq!(
            worker.task().commander().sent,
            vec!["chassis speed x 3;", "chassis speed x -2;"]
        );

        worker.close();
        assert!(worker.task().commander().closed);
    }

    #[test]
    fn command_failure_fails_the_worker() {
        let mut commander = Recorder::default();
        commander.closed = true;
        let worker = Mind::new(
            WorkerContext::new("mind-closed"),
            commander,
            Vec::<Inlet<i32>>::new(),
            |cmd: &mut Recorder, _: &mut [Inlet<i32>]| {
                cmd.send(&["gimbal", "recenter"])?;
                Ok(())
            },
            false,
        )
        .unwrap();
        assert!(matches!(
            worker.run(),
            Err(WorkerError::Command(CommandError::Closed))
        ));
    }
}
