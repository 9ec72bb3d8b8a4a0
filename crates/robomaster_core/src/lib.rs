//! # RoboMaster Core
//!
//! Crate compartilhada com os registros tipados, o decodificador dos
//! streams de push/eventos, as constantes e a configuração TOML, e o
//! cliente de comandos do robô.
//!
//! ## Módulos
//! - [`records`] – Registros de telemetria (chassis, gimbal, armor, sound)
//! - [`decoder`] – Cláusulas `;` → registros, com herança de categoria
//! - [`config`] – Constantes do protocolo e configuração unificada via TOML
//! - [`commander`] – Trait do cliente de comandos e implementação TCP

pub mod records;
pub mod decoder;
pub mod config;
pub mod commander;

// Re-exports convenientes
pub use records::TelemetryRecord;
pub use decoder::{decode_event, decode_push, DecodeError};
pub use config::{AppConfig, ConfigError, HubConfig, WorkerConfig};
pub use commander::{Commander, CommandError, TcpCommander};
