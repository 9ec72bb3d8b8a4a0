//! Vision – worker que consome quadros de vídeo.
//!
//! A decodificação de vídeo fica fora do crate: o worker recebe qualquer
//! [`FrameSource`]. [`RawVideo`] é a fonte mínima, que entrega o stream
//! H.264 da porta de vídeo em blocos de `MEDIA_BUF_SIZE` bytes.

use crate::channel::Outlet;
use crate::worker::{Task, Unit, Worker, WorkerBuilder, WorkerContext, WorkerError};
use robomaster_core::config::MEDIA_BUF_SIZE;
use std::io::{self, Read};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, info};

/// Fonte de quadros.
pub trait FrameSource {
    type Frame;

    /// Próximo quadro. `Ok(None)` quando o stream acabou.
    fn read_frame(&mut self) -> io::Result<Option<Self::Frame>>;

    /// Libera a fonte. Idempotente.
    fn release(&mut self) {}
}

/// Stream de vídeo bruto, em blocos.
pub struct RawVideo {
    conn: Option<TcpStream>,
    chunk: usize,
}

impl RawVideo {
    /// Conecta na porta de vídeo do robô (o stream precisa estar ligado
    /// com `stream on`).
    pub fn connect(ip: IpAddr, port: u16, timeout: Duration) -> io::Result<Self> {
        let address = SocketAddr::new(ip, port);
        let conn = TcpStream::connect_timeout(&address, timeout)?;
        conn.set_read_timeout(Some(timeout))?;
        info!("Stream de vídeo conectado em {address}");
        Ok(Self::from_stream(conn))
    }

    pub fn from_stream(conn: TcpStream) -> Self {
        Self {
            conn: Some(conn),
            chunk: MEDIA_BUF_SIZE,
        }
    }
}

impl FrameSource for RawVideo {
    type Frame = Vec<u8>;

    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.chunk];
        let size = conn.read(&mut buf)?;
        if size == 0 {
            return Ok(None);
        }
        buf.truncate(size);
        Ok(Some(buf))
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.shutdown(Shutdown::Both);
            debug!("Stream de vídeo fechado");
        }
    }
}

/// Lê quadros, passa cada um pelo `processing` e enfileira o resultado.
///
/// Resultados `None` não são enfileirados. Sem saída configurada, o
/// `processing` roda só pelos efeitos colaterais.
pub struct Vision<S, P, O> {
    source: S,
    processing: P,
    frames: u64,
    _out: std::marker::PhantomData<fn() -> O>,
}

impl<S, P, O> Vision<S, P, O>
where
    S: FrameSource,
    P: FnMut(S::Frame) -> Option<O>,
    O: serde::Serialize,
{
    pub fn new(
        ctx: WorkerContext,
        out: Option<Outlet<O>>,
        source: S,
        processing: P,
    ) -> Result<Worker<Self>, WorkerError> {
        let builder = WorkerBuilder::new(ctx);
        let builder = match out {
            Some(out) => builder.outlet(out),
            None => builder,
        };
        builder.build(Vision {
            source,
            processing,
            frames: 0,
            _out: std::marker::PhantomData,
        })
    }

    /// Quadros processados até agora.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl<S, P, O> Task for Vision<S, P, O>
where
    S: FrameSource,
    P: FnMut(S::Frame) -> Option<O>,
    O: serde::Serialize,
{
    type Output = O;

    fn step(&mut self, unit: &mut Unit<O>) -> Result<(), WorkerError> {
        let frame = match self.source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(_) if unit.is_closed() => return Ok(()),
            Ok(None) => {
                return Err(WorkerError::FrameSource(
                    "sem quadros (fim do stream?)".into(),
                ));
            }
            Err(e) => return Err(WorkerError::FrameSource(e.to_string())),
        };

        self.frames += 1;
        if let Some(item) = (self.processing)(frame) {
            if unit.has_outlet() {
                unit.outlet(&item)?;
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        self.source.release();
    }
}
