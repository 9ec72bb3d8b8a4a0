//! Registros tipados de telemetria e eventos do robô.
//!
//! Cada variante é um value object imutável. Todos derivam serde para
//! atravessar o canal entre processos via bincode.

use serde::{Deserialize, Serialize};
use std::num::{ParseFloatError, ParseIntError};

/// Erro ao interpretar a resposta textual de uma consulta (`chassis speed ?` etc).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplyError {
    #[error("Resposta com {found} campos (esperado {expected}): {reply:?}")]
    FieldCount {
        expected: usize,
        found: usize,
        reply: String,
    },

    #[error("Número inválido {token:?}: {reason}")]
    Number { token: String, reason: String },

    #[error("Flag inválida {0:?} (aceita apenas \"0\" ou \"1\")")]
    Flag(String),
}

// ──────────────────────────────────────────────
// Chassis
// ──────────────────────────────────────────────

/// Velocidade do chassis e das quatro rodas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChassisSpeed {
    /// Velocidade em x (m/s)
    pub x: f64,
    /// Velocidade em y (m/s)
    pub y: f64,
    /// Rotação em z (°/s)
    pub z: f64,
    /// Rodas (rpm)
    pub w1: i32,
    pub w2: i32,
    pub w3: i32,
    pub w4: i32,
}

/// Posição do chassis relativa ao ponto de ligação.
///
/// `z` só existe em respostas de consulta; o push nunca informa altitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChassisPosition {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

/// Atitude do chassis (graus).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChassisAttitude {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// Estado do chassis. A ordem dos campos é a ordem do protocolo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisStatus {
    /// Parado
    #[serde(rename = "static")]
    pub static_: bool,
    /// Subindo rampa
    pub uphill: bool,
    /// Descendo rampa
    pub downhill: bool,
    /// Deslizando na rampa
    pub on_slope: bool,
    /// Levantado
    pub pick_up: bool,
    /// Derrapando
    pub slip: bool,
    /// Impacto no eixo x
    pub impact_x: bool,
    /// Impacto no eixo y
    pub impact_y: bool,
    /// Impacto no eixo z
    pub impact_z: bool,
    /// Capotado
    pub roll_over: bool,
    /// Parado em rampa
    pub hill_static: bool,
}

impl ChassisStatus {
    /// Número de flags no protocolo.
    pub const FIELDS: usize = 11;

    /// Monta o estado a partir das 11 flags, na ordem do protocolo.
    pub fn from_flags(f: [bool; Self::FIELDS]) -> Self {
        Self {
            static_: f[0],
            uphill: f[1],
            downhill: f[2],
            on_slope: f[3],
            pick_up: f[4],
            slip: f[5],
            impact_x: f[6],
            impact_y: f[7],
            impact_z: f[8],
            roll_over: f[9],
            hill_static: f[10],
        }
    }

    /// Flags na ordem do protocolo.
    pub fn flags(&self) -> [bool; Self::FIELDS] {
        [
            self.static_,
            self.uphill,
            self.downhill,
            self.on_slope,
            self.pick_up,
            self.slip,
            self.impact_x,
            self.impact_y,
            self.impact_z,
            self.roll_over,
            self.hill_static,
        ]
    }
}

// ──────────────────────────────────────────────
// Gimbal
// ──────────────────────────────────────────────

/// Atitude do gimbal (graus).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GimbalAttitude {
    pub pitch: f64,
    pub yaw: f64,
}

// ──────────────────────────────────────────────
// Eventos
// ──────────────────────────────────────────────

/// Armadura atingida.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmorHitEvent {
    pub index: i32,
    #[serde(rename = "type")]
    pub kind: i32,
}

/// Palmas detectadas pelo microfone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundApplauseEvent {
    pub count: i32,
}

// ──────────────────────────────────────────────
// União
// ──────────────────────────────────────────────

/// Um registro decodificado do stream de push ou de eventos.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TelemetryRecord {
    ChassisSpeed(ChassisSpeed),
    ChassisPosition(ChassisPosition),
    ChassisAttitude(ChassisAttitude),
    ChassisStatus(ChassisStatus),
    GimbalAttitude(GimbalAttitude),
    ArmorHit(ArmorHitEvent),
    SoundApplause(SoundApplauseEvent),
}

// ──────────────────────────────────────────────
// Parsing de campos
// ──────────────────────────────────────────────

pub(crate) fn parse_f64(token: &str) -> Result<f64, ParseFloatError> {
    token.parse::<f64>()
}

pub(crate) fn parse_i32(token: &str) -> Result<i32, ParseIntError> {
    token.parse::<i32>()
}

/// Só aceita os literais `"0"` e `"1"`.
pub(crate) fn parse_flag(token: &str) -> Option<bool> {
    match token {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

fn reply_fields(reply: &str, expected: usize) -> Result<Vec<&str>, ReplyError> {
    let fields: Vec<&str> = reply.split_whitespace().collect();
    if fields.len() != expected {
        return Err(ReplyError::FieldCount {
            expected,
            found: fields.len(),
            reply: reply.to_string(),
        });
    }
    Ok(fields)
}

fn reply_f64(token: &str) -> Result<f64, ReplyError> {
    parse_f64(token).map_err(|e| ReplyError::Number {
        token: token.to_string(),
        reason: e.to_string(),
    })
}

fn reply_i32(token: &str) -> Result<i32, ReplyError> {
    parse_i32(token).map_err(|e| ReplyError::Number {
        token: token.to_string(),
        reason: e.to_string(),
    })
}

impl ChassisSpeed {
    /// Resposta de `chassis speed ?`: `x y z w1 w2 w3 w4`.
    pub fn from_reply(reply: &str) -> Result<Self, ReplyError> {
        let f = reply_fields(reply, 7)?;
        Ok(Self {
            x: reply_f64(f[0])?,
            y: reply_f64(f[1])?,
            z: reply_f64(f[2])?,
            w1: reply_i32(f[3])?,
            w2: reply_i32(f[4])?,
            w3: reply_i32(f[5])?,
            w4: reply_i32(f[6])?,
        })
    }
}

impl ChassisPosition {
    /// Resposta de `chassis position ?`: `x y z`. Aqui a altitude existe.
    pub fn from_reply(reply: &str) -> Result<Self, ReplyError> {
        let f = reply_fields(reply, 3)?;
        Ok(Self {
            x: reply_f64(f[0])?,
            y: reply_f64(f[1])?,
            z: Some(reply_f64(f[2])?),
        })
    }
}

impl ChassisAttitude {
    /// Resposta de `chassis attitude ?`: `pitch roll yaw`.
    pub fn from_reply(reply: &str) -> Result<Self, ReplyError> {
        let f = reply_fields(reply, 3)?;
        Ok(Self {
            pitch: reply_f64(f[0])?,
            roll: reply_f64(f[1])?,
            yaw: reply_f64(f[2])?,
        })
    }
}

impl ChassisStatus {
    /// Resposta de `chassis status ?`: 11 flags.
    pub fn from_reply(reply: &str) -> Result<Self, ReplyError> {
        let f = reply_fields(reply, Self::FIELDS)?;
        let mut flags = [false; Self::FIELDS];
        for (slot, token) in flags.iter_mut().zip(f) {
            *slot = parse_flag(token).ok_or_else(|| ReplyError::Flag(token.to_string()))?;
        }
        Ok(Self::from_flags(flags))
    }
}

impl GimbalAttitude {
    /// Resposta de `gimbal attitude ?`: `pitch yaw`.
    pub fn from_reply(reply: &str) -> Result<Self, ReplyError> {
        let f = reply_fields(reply, 2)?;
        Ok(Self {
            pitch: reply_f64(f[0])?,
            yaw: reply_f64(f[1])?,
        })
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
