//! # RoboMaster Hub
//!
//! Runtime de processos: cada worker roda isolado em um processo filho,
//! conversando com os demais só por canais limitados.
//!
//! ```text
//! UDP push ──▶ Listener ──┐
//!                         ├─ canal ─▶ Mind ──▶ comandos TCP
//! TCP eventos ▶ Listener ─┘
//! ```
//!
//! ## Módulos
//! - [`channel`] – Canal limitado entre processos (`Outlet`/`Inlet`)
//! - [`worker`] – Unidade de trabalho: transporte, saída, loop e fechamento
//! - [`hub`] – Supervisor: `fork` por worker, desligamento com prazo
//! - [`signal`] – SIGINT/SIGTERM → canal (hub) ou token (filhos)
//! - [`listener`] – Listeners de push e de eventos
//! - [`vision`] – Worker de vídeo sobre uma fonte de quadros
//! - [`mind`] – Controlador sem estado sobre um `Commander`

pub mod channel;
pub mod worker;
pub mod hub;
pub mod signal;
pub mod listener;
pub mod vision;
pub mod mind;

pub use channel::{channel, ChannelError, Inlet, Outlet};
pub use worker::{CloseToken, Task, TransportMode, Unit, Worker, WorkerBuilder, WorkerContext, WorkerError};
pub use hub::{ChildExit, Hub, HubError, ShutdownReport};
pub use listener::{Listener, StreamKind};
pub use vision::{FrameSource, RawVideo, Vision};
pub use mind::Mind;
