//! Decodificador dos streams de push e de eventos.
//!
//! Formato da mensagem (uma leitura de socket):
//!
//! ```text
//! chassis push attitude -0.894 -0.117 0.423 ; status 0 1 0 0 0 0 0 0 0 0 0 ;gimbal push attitude -0.300 -0.100
//! └─ categoria ─┘└subtipo┘└──── campos ────┘   └subtipo┘└────── campos ───────┘
//! ```
//!
//! - Cláusulas separadas por `;` (`;` final opcional)
//! - Uma cláusula sem categoria herda a categoria da anterior
//! - Os campos são lidos do **fim** da cláusula, com largura fixa por subtipo,
//!   por isso o extrator não depende da presença do prefixo
//!
//! O decodificador é puro: a categoria corrente é o acumulador de um fold.

use crate::records::{
    parse_f64, parse_flag, parse_i32, ArmorHitEvent, ChassisAttitude, ChassisPosition,
    ChassisStatus, GimbalAttitude, SoundApplauseEvent, TelemetryRecord,
};

/// Posição do subtipo numa cláusula com prefixo (`categoria verbo subtipo ...`).
const PREFIXED_SUBTYPE_INDEX: usize = 2;

/// Categoria de uma cláusula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Chassis,
    Gimbal,
    Armor,
    Sound,
}

impl Category {
    pub const fn name(self) -> &'static str {
        match self {
            Category::Chassis => "chassis",
            Category::Gimbal => "gimbal",
            Category::Armor => "armor",
            Category::Sound => "sound",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Conjunto de categorias aceitas por um stream.
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    categories: &'static [Category],
}

/// Stream de push (UDP): chassis e gimbal.
pub const PUSH_GRAMMAR: Grammar = Grammar {
    categories: &[Category::Chassis, Category::Gimbal],
};

/// Stream de eventos (TCP): armor e sound.
pub const EVENT_GRAMMAR: Grammar = Grammar {
    categories: &[Category::Armor, Category::Sound],
};

impl Grammar {
    fn category(&self, token: &str) -> Option<Category> {
        self.categories.iter().copied().find(|c| c.name() == token)
    }
}

/// Tabela de decodificação: cada entrada declara largura e construtor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subtype {
    ChassisPosition,
    ChassisAttitude,
    ChassisStatus,
    GimbalAttitude,
    ArmorHit,
    SoundApplause,
}

impl Subtype {
    fn lookup(category: Category, token: &str) -> Option<Self> {
        match (category, token) {
            (Category::Chassis, "position") => Some(Subtype::ChassisPosition),
            (Category::Chassis, "attitude") => Some(Subtype::ChassisAttitude),
            (Category::Chassis, "status") => Some(Subtype::ChassisStatus),
            (Category::Gimbal, "attitude") => Some(Subtype::GimbalAttitude),
            (Category::Armor, "hit") => Some(Subtype::ArmorHit),
            (Category::Sound, "applause") => Some(Subtype::SoundApplause),
            _ => None,
        }
    }

    /// Quantidade de tokens finais consumidos.
    const fn width(self) -> usize {
        match self {
            Subtype::ChassisPosition => 2,
            Subtype::ChassisAttitude => 3,
            Subtype::ChassisStatus => ChassisStatus::FIELDS,
            Subtype::GimbalAttitude => 2,
            Subtype::ArmorHit => 2,
            Subtype::SoundApplause => 1,
        }
    }

    /// `fields` tem exatamente `self.width()` tokens.
    fn build(self, fields: &[&str]) -> Result<TelemetryRecord, DecodeErrorKind> {
        let record = match self {
            Subtype::ChassisPosition => TelemetryRecord::ChassisPosition(ChassisPosition {
                x: float(fields[0])?,
                y: float(fields[1])?,
                // O push não informa altitude, mesmo que a consulta informe.
                z: None,
            }),
            Subtype::ChassisAttitude => TelemetryRecord::ChassisAttitude(ChassisAttitude {
                pitch: float(fields[0])?,
                roll: float(fields[1])?,
                yaw: float(fields[2])?,
            }),
            Subtype::ChassisStatus => {
                let mut flags = [false; ChassisStatus::FIELDS];
                for (slot, token) in flags.iter_mut().zip(fields) {
                    *slot = parse_flag(token)
                        .ok_or_else(|| DecodeErrorKind::InvalidFlag(token.to_string()))?;
                }
                TelemetryRecord::ChassisStatus(ChassisStatus::from_flags(flags))
            }
            Subtype::GimbalAttitude => TelemetryRecord::GimbalAttitude(GimbalAttitude {
                pitch: float(fields[0])?,
                yaw: float(fields[1])?,
            }),
            Subtype::ArmorHit => TelemetryRecord::ArmorHit(ArmorHitEvent {
                index: int(fields[0])?,
                kind: int(fields[1])?,
            }),
            Subtype::SoundApplause => TelemetryRecord::SoundApplause(SoundApplauseEvent {
                count: int(fields[0])?,
            }),
        };
        Ok(record)
    }
}

fn float(token: &str) -> Result<f64, DecodeErrorKind> {
    parse_f64(token).map_err(|e| DecodeErrorKind::InvalidNumber {
        token: token.to_string(),
        reason: e.to_string(),
    })
}

fn int(token: &str) -> Result<i32, DecodeErrorKind> {
    parse_i32(token).map_err(|e| DecodeErrorKind::InvalidNumber {
        token: token.to_string(),
        reason: e.to_string(),
    })
}

// ──────────────────────────────────────────────
// Erros
// ──────────────────────────────────────────────

/// Motivo da falha numa cláusula.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("cláusula com {0} tokens (mínimo 2)")]
    TooFewTokens(usize),

    #[error("nenhuma categoria definida até esta cláusula")]
    NoCategory,

    #[error("cláusula com prefixo sem subtipo")]
    MissingSubtype,

    #[error("subtipo desconhecido {subtype:?} para {category}")]
    UnknownSubtype { category: Category, subtype: String },

    #[error("{found} campos disponíveis, {expected} esperados")]
    MissingFields { expected: usize, found: usize },

    #[error("número inválido {token:?}: {reason}")]
    InvalidNumber { token: String, reason: String },

    #[error("flag inválida {0:?} (aceita apenas \"0\" ou \"1\")")]
    InvalidFlag(String),
}

/// Falha ao decodificar uma mensagem. Nenhum registro parcial é devolvido.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Cláusula {index} inválida: {kind} – mensagem: {message:?}")]
pub struct DecodeError {
    /// Índice da cláusula na mensagem
    pub index: usize,
    /// Mensagem bruta, para diagnóstico
    pub message: String,
    pub kind: DecodeErrorKind,
}

// ──────────────────────────────────────────────
// Decodificação
// ──────────────────────────────────────────────

/// Decodifica uma mensagem do stream de push.
pub fn decode_push(message: &str) -> Result<Vec<TelemetryRecord>, DecodeError> {
    decode(&PUSH_GRAMMAR, message)
}

/// Decodifica uma mensagem do stream de eventos.
pub fn decode_event(message: &str) -> Result<Vec<TelemetryRecord>, DecodeError> {
    decode(&EVENT_GRAMMAR, message)
}

/// Decodifica uma mensagem completa em registros, na ordem do fio.
pub fn decode(grammar: &Grammar, message: &str) -> Result<Vec<TelemetryRecord>, DecodeError> {
    let body = message.trim_matches(|c: char| c == ';' || c.is_whitespace());

    let (_, records) = body.split(';').enumerate().try_fold(
        (None::<Category>, Vec::new()),
        |(current, mut records), (index, clause)| -> Result<_, DecodeError> {
            let (category, record) =
                decode_clause(grammar, current, clause).map_err(|kind| DecodeError {
                    index,
                    message: message.to_string(),
                    kind,
                })?;
            records.push(record);
            Ok((Some(category), records))
        },
    )?;

    Ok(records)
}

fn decode_clause(
    grammar: &Grammar,
    current: Option<Category>,
    clause: &str,
) -> Result<(Category, TelemetryRecord), DecodeErrorKind> {
    let words: Vec<&str> = clause.split_whitespace().collect();
    if words.len() < 2 {
        return Err(DecodeErrorKind::TooFewTokens(words.len()));
    }

    let prefixed = grammar.category(words[0]);
    let category = prefixed.or(current).ok_or(DecodeErrorKind::NoCategory)?;

    let subtype_index = if prefixed.is_some() {
        PREFIXED_SUBTYPE_INDEX
    } else {
        0
    };
    let token = words
        .get(subtype_index)
        .ok_or(DecodeErrorKind::MissingSubtype)?;
    let subtype =
        Subtype::lookup(category, token).ok_or_else(|| DecodeErrorKind::UnknownSubtype {
            category,
            subtype: token.to_string(),
        })?;

    let width = subtype.width();
    let available = words.len() - subtype_index - 1;
    if available < width {
        return Err(DecodeErrorKind::MissingFields {
            expected: width,
            found: available,
        });
    }

    let record = subtype.build(&words[words.len() - width..])?;
    Ok((category, record))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_gimbal_attitude() {
        let records = decode_push("gimbal push attitude -0.300 -0.100").unwrap();
        assert_eq!(
            records,
            vec![TelemetryRecord::GimbalAttitude(GimbalAttitude {
                pitch: -0.3,
                yaw: -0.1,
            })]
        );
    }

    #[test]
    fn burst_preserves_wire_order() {
        let msg = "chassis push attitude -0.894 -0.117 0.423 ; status 0 1 0 0 0 0 0 0 0 0 0 ;gimbal push attitude -0.300 -0.100";
        let records = decode_push(msg).unwrap();

        let mut flags = [false; ChassisStatus::FIELDS];
        flags[1] = true;
        assert_eq!(
            records,
            vec![
                TelemetryRecord::ChassisAttitude(ChassisAttitude {
                    pitch: -0.894,
                    roll: -0.117,
                    yaw: 0.423,
                }),
                TelemetryRecord::ChassisStatus(ChassisStatus::from_flags(flags)),
                TelemetryRecord::GimbalAttitude(GimbalAttitude {
                    pitch: -0.3,
                    yaw: -0.1,
                }),
            ]
        );
    }

    #[test]
    fn continuation_inherits_category() {
        let records =
            decode_push("chassis push position 0.001 0.000 ; attitude -0.892 -0.115 0.422").unwrap();
        assert_eq!(
            records,
            vec![
                TelemetryRecord::ChassisPosition(ChassisPosition {
                    x: 0.001,
                    y: 0.0,
                    z: None,
                }),
                TelemetryRecord::ChassisAttitude(ChassisAttitude {
                    pitch: -0.892,
                    roll: -0.115,
                    yaw: 0.422,
                }),
            ]
        );
    }

    #[test]
    fn trailing_semicolon_and_whitespace_are_ignored() {
        let records = decode_push("  gimbal push attitude 1.0 2.0 ;\n").unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn empty_message_fails() {
        let err = decode_push("").unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.kind, DecodeErrorKind::TooFewTokens(0));
    }

    #[test]
    fn single_word_fails() {
        let err = decode_push("whatever").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TooFewTokens(1));
        assert_eq!(err.message, "whatever");
    }

    #[test]
    fn clause_without_category_fails() {
        let err = decode_push("attitude 1.0 2.0 3.0").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::NoCategory);
    }

    #[test]
    fn status_all_ones_and_all_zeros() {
        let ones = decode_push("chassis push status 1 1 1 1 1 1 1 1 1 1 1").unwrap();
        assert_eq!(
            ones,
            vec![TelemetryRecord::ChassisStatus(ChassisStatus::from_flags(
                [true; ChassisStatus::FIELDS]
            ))]
        );

        let zeros = decode_push("chassis push status 0 0 0 0 0 0 0 0 0 0 0").unwrap();
        assert_eq!(
            zeros,
            vec![TelemetryRecord::ChassisStatus(ChassisStatus::default())]
        );
    }

    #[test]
    fn status_rejects_non_binary_flags() {
        let err = decode_push("chassis push status 0 0 0 0 0 0 0 0 0 0 true").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidFlag("true".into()));
    }

    #[test]
    fn unknown_subtype_reports_clause_index() {
        let err = decode_push("gimbal push attitude 1 2; speed 1 2").unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(
            err.kind,
            DecodeErrorKind::UnknownSubtype { category: Category::Gimbal, .. }
        ));
    }

    #[test]
    fn short_field_window_fails() {
        let err = decode_push("chassis push attitude 1.0 2.0").unwrap_err();
        assert_eq!(
            err.kind,
            DecodeErrorKind::MissingFields {
                expected: 3,
                found: 2,
            }
        );
    }

    #[test]
    fn prefixed_clause_without_subtype_fails() {
        let err = decode_push("chassis push").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::MissingSubtype);
    }

    #[test]
    fn non_numeric_field_fails() {
        let err = decode_push("gimbal push attitude 1.0 north").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::InvalidNumber { .. }));
    }

    #[test]
    fn empty_clause_in_the_middle_fails() {
        let err = decode_push("gimbal push attitude 1 2;; attitude 3 4").unwrap_err();
        assert_eq!(err.index, 1);
    }

    #[test]
    fn armor_and_sound_events() {
        let records = decode_event("armor event hit 1 0 ; hit 3 2 ; sound event applause 2").unwrap();
        assert_eq!(
            records,
            vec![
                TelemetryRecord::ArmorHit(ArmorHitEvent { index: 1, kind: 0 }),
                TelemetryRecord::ArmorHit(ArmorHitEvent { index: 3, kind: 2 }),
                TelemetryRecord::SoundApplause(SoundApplauseEvent { count: 2 }),
            ]
        );
    }

    #[test]
    fn event_integers_reject_floats() {
        let err = decode_event("armor event hit 1.5 0").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::InvalidNumber { .. }));
    }

    #[test]
    fn grammars_do_not_overlap() {
        let err = decode_push("armor event hit 1 0").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::NoCategory);

        let err = decode_event("gimbal push attitude 1 2").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::NoCategory);
    }
}
