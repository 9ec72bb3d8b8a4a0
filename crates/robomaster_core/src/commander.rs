//! Cliente de comandos do robô.
//!
//! O runtime só depende do trait [`Commander`]: envia palavras, recebe a
//! resposta em texto. [`TcpCommander`] é a implementação sobre a porta de
//! controle (modo SDK em texto, comandos terminados em `;`).

use crate::config::DEFAULT_BUF_SIZE;
use std::io::{Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, info};

/// Erros do cliente de comandos.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Comando vazio")]
    Empty,

    #[error("Conexão de comandos já fechada")]
    Closed,

    #[error("Robô recusou entrar no modo SDK: {0:?}")]
    SdkRejected(String),

    #[error("Resposta não é UTF-8 válido")]
    InvalidReply,

    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Capacidade de comandar o robô: envia um comando, devolve a resposta.
pub trait Commander: Send {
    /// Envia `words` unidas por espaço e devolve a resposta sem espaços nas pontas.
    fn send(&mut self, words: &[&str]) -> Result<String, CommandError>;

    /// Endereço remoto da conexão de controle.
    fn connected_address(&self) -> SocketAddr;

    /// Libera a conexão. Idempotente.
    fn close(&mut self) {}
}

/// Monta o texto de um comando: `palavra palavra ...;`.
pub fn command_line(words: &[&str]) -> Result<String, CommandError> {
    if words.is_empty() {
        return Err(CommandError::Empty);
    }
    Ok(format!("{};", words.join(" ")))
}

/// Cliente de comandos sobre TCP.
pub struct TcpCommander {
    conn: Option<TcpStream>,
    address: SocketAddr,
}

impl TcpCommander {
    /// Conecta na porta de controle e entra no modo SDK.
    pub fn connect(ip: IpAddr, port: u16, timeout: Duration) -> Result<Self, CommandError> {
        let address = SocketAddr::new(ip, port);
        let conn = TcpStream::connect_timeout(&address, timeout)?;
        conn.set_read_timeout(Some(timeout))?;
        conn.set_write_timeout(Some(timeout))?;

        let mut commander = Self {
            conn: Some(conn),
            address,
        };
        let reply = commander.send(&["command"])?;
        if reply != "ok" && reply != "Already in SDK mode" {
            commander.close();
            return Err(CommandError::SdkRejected(reply));
        }

        info!("Modo SDK ativo em {address}");
        Ok(commander)
    }
}

impl Commander for TcpCommander {
    fn send(&mut self, words: &[&str]) -> Result<String, CommandError> {
        let line = command_line(words)?;
        let conn = self.conn.as_mut().ok_or(CommandError::Closed)?;

        conn.write_all(line.as_bytes())?;
        let mut buf = [0u8; DEFAULT_BUF_SIZE];
        let size = conn.read(&mut buf)?;
        let reply = std::str::from_utf8(&buf[..size]).map_err(|_| CommandError::InvalidReply)?;

        // A resposta às vezes vem com espaço sobrando no fim.
        let reply = reply.trim().to_string();
        debug!("{line} → {reply}");
        Ok(reply)
    }

    fn connected_address(&self) -> SocketAddr {
        self.address
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.shutdown(Shutdown::Both);
            debug!("Conexão de comandos com {} fechada", self.address);
        }
    }
}

impl Drop for TcpCommander {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Robô falso: responde cada comando com a função dada.
    fn fake_robot(reply: fn(&str) -> String) -> (SocketAddr, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 512];
            loop {
                let size = match conn.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(size) => size,
                };
                let line = String::from_utf8_lossy(&buf[..size]).to_string();
                conn.write_all(reply(&line).as_bytes()).unwrap();
                seen.push(line);
            }
            seen
        });
        (addr, handle)
    }

    #[test]
    fn command_line_joins_words() {
        assert_eq!(
            command_line(&["chassis", "speed", "x", "0.5"]).unwrap(),
            "chassis speed x 0.5;"
        );
        assert!(matches!(command_line(&[]), Err(CommandError::Empty)));
    }

    #[test]
    fn connect_enters_sdk_mode_and_sends() {
        let (addr, robot) = fake_robot(|line| match line {
            "command;" => "ok".into(),
            _ => "version 01.01.0000 ".into(),
        });

        let mut cmd = TcpCommander::connect(addr.ip(), addr.port(), Duration::from_secs(2)).unwrap();
        assert_eq!(cmd.connected_address(), addr);
        assert_eq!(cmd.send(&["version", "?"]).unwrap(), "version 01.01.0000");
        cmd.close();
        assert!(matches!(cmd.send(&["version", "?"]), Err(CommandError::Closed)));

        let seen = robot.join().unwrap();
        assert_eq!(seen, vec!["command;".to_string(), "version ?;".to_string()]);
    }

    #[test]
    fn already_in_sdk_mode_is_accepted() {
        let (addr, _robot) = fake_robot(|_| "Already in SDK mode".into());
        assert!(TcpCommander::connect(addr.ip(), addr.port(), Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn sdk_refusal_is_an_error() {
        let (addr, _robot) = fake_robot(|_| "error".into());
        assert!(matches!(
            TcpCommander::connect(addr.ip(), addr.port(), Duration::from_secs(2)),
            Err(CommandError::SdkRejected(reply)) if reply == "error"
        ));
    }
}
