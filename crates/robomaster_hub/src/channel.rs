//! Canal limitado entre processos.
//!
//! Par de sockets Unix datagram (herdado pelo `fork`). Cada item vai em um
//! datagrama serializado com bincode, então as fronteiras são preservadas.
//! O limite é a fila do kernel: com ela cheia, `send` bloqueia até o timeout.
//!
//! ```text
//! ┌──────────┐  bincode(item)  ┌──────────┐
//! │ Outlet<T>│ ──────────────▶ │ Inlet<T> │
//! └──────────┘   1 datagrama   └──────────┘
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::marker::PhantomData;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::time::Duration;

/// Maior item aceito (bytes serializados).
pub const MAX_FRAME: usize = 64 * 1024;

/// `set_*_timeout` não aceita zero.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Erros do canal.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Item muito grande ({0} bytes, máximo {MAX_FRAME})")]
    Oversized(usize),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),

    #[error("Erro de I/O no canal: {0}")]
    Io(#[from] io::Error),
}

/// Ponta produtora.
pub struct Outlet<T> {
    sock: UnixDatagram,
    _item: PhantomData<fn(T)>,
}

/// Ponta consumidora.
pub struct Inlet<T> {
    sock: UnixDatagram,
    buf: Vec<u8>,
    _item: PhantomData<fn() -> T>,
}

/// Cria um canal cujo buffer do kernel tem `buffer_bytes` (0 = padrão do sistema).
pub fn channel<T>(buffer_bytes: usize) -> Result<(Outlet<T>, Inlet<T>), ChannelError> {
    let (tx, rx) = UnixDatagram::pair()?;
    if buffer_bytes > 0 {
        set_buffer(&tx, libc::SO_SNDBUF, buffer_bytes)?;
        set_buffer(&rx, libc::SO_RCVBUF, buffer_bytes)?;
    }

    Ok((
        Outlet {
            sock: tx,
            _item: PhantomData,
        },
        Inlet {
            sock: rx,
            buf: vec![0u8; MAX_FRAME],
            _item: PhantomData,
        },
    ))
}

fn set_buffer(sock: &UnixDatagram, option: libc::c_int, bytes: usize) -> io::Result<()> {
    let value = libc::c_int::try_from(bytes).unwrap_or(libc::c_int::MAX);
    // SAFETY: fd válido enquanto `sock` vive; `value` é um c_int no stack.
    let rc = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Serializa um item no formato de um datagrama.
pub(crate) fn encode<T: Serialize>(item: &T) -> Result<Vec<u8>, ChannelError> {
    let frame = bincode::serialize(item).map_err(|e| ChannelError::Serialize(e.to_string()))?;
    if frame.len() > MAX_FRAME {
        return Err(ChannelError::Oversized(frame.len()));
    }
    Ok(frame)
}

impl<T> Outlet<T> {
    /// Uma tentativa de envio. `Ok(false)` se a fila continuou cheia até o timeout.
    pub(crate) fn send_frame(&self, frame: &[u8], timeout: Duration) -> Result<bool, ChannelError> {
        self.sock.set_write_timeout(Some(timeout.max(MIN_TIMEOUT)))?;
        match self.sock.send(frame) {
            Ok(_) => Ok(true),
            Err(e) if is_timeout(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: Serialize> Outlet<T> {
    /// Enfileira `item`, esperando no máximo `timeout` por espaço.
    ///
    /// Retorna `Ok(false)` se a fila continuou cheia.
    pub fn send_timeout(&self, item: &T, timeout: Duration) -> Result<bool, ChannelError> {
        let frame = encode(item)?;
        self.send_frame(&frame, timeout)
    }
}

impl<T: DeserializeOwned> Inlet<T> {
    /// Espera um item por no máximo `timeout`. `Ok(None)` se nada chegou.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<T>, ChannelError> {
        self.sock.set_read_timeout(Some(timeout.max(MIN_TIMEOUT)))?;
        let size = match self.sock.recv(&mut self.buf) {
            Ok(size) => size,
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        bincode::deserialize(&self.buf[..size])
            .map(Some)
            .map_err(|e| ChannelError::Deserialize(e.to_string()))
    }

    /// Consome tudo o que já está na fila.
    pub fn drain(&mut self) -> Result<Vec<T>, ChannelError> {
        let mut items = Vec::new();
        while let Some(item) = self.recv_timeout(MIN_TIMEOUT)? {
            items.push(item);
        }
        Ok(items)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use robomaster_core::records::{GimbalAttitude, TelemetryRecord};

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn items_arrive_in_order() {
        let (tx, mut rx) = channel::<TelemetryRecord>(0).unwrap();
        for i in 0..3 {
            let record = TelemetryRecord::GimbalAttitude(GimbalAttitude {
                pitch: i as f64,
                yaw: -1.0,
            });
            assert!(tx.send_timeout(&record, SHORT).unwrap());
        }

        let items = rx.drain().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[2],
            TelemetryRecord::GimbalAttitude(GimbalAttitude {
                pitch: 2.0,
                yaw: -1.0,
            })
        );
    }

    #[test]
    fn empty_channel_times_out() {
        let (_tx, mut rx) = channel::<u32>(0).unwrap();
        assert!(rx.recv_timeout(SHORT).unwrap().is_none());
    }

    #[test]
    fn full_channel_reports_false() {
        let (tx, mut rx) = channel::<u64>(4096).unwrap();
        let mut sent = 0usize;
        while tx.send_timeout(&7, SHORT).unwrap() {
            sent += 1;
            assert!(sent < 100_000, "canal nunca encheu");
        }
        assert!(sent > 0);

        assert_eq!(rx.drain().unwrap().len(), sent);
        assert!(tx.send_timeout(&8, SHORT).unwrap());
    }

    #[test]
    fn oversized_item_is_rejected() {
        let (tx, _rx) = channel::<Vec<u8>>(0).unwrap();
        let big = vec![0u8; MAX_FRAME + 1];
        assert!(matches!(
            tx.send_timeout(&big, SHORT),
            Err(ChannelError::Oversized(_))
        ));
    }
}
