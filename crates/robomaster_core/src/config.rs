//! Constantes do protocolo e configuração unificada via TOML.
//!
//! As constantes são imutáveis; o `config.toml` só sobrescreve os
//! valores padrão de cada seção.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

// ──────────────────────────────────────────────
// Constantes do protocolo
// ──────────────────────────────────────────────

pub const VIDEO_PORT: u16 = 40921;
pub const AUDIO_PORT: u16 = 40922;
pub const CTRL_PORT: u16 = 40923;
pub const PUSH_PORT: u16 = 40924;
pub const EVENT_PORT: u16 = 40925;
pub const IP_PORT: u16 = 40926;

/// Tamanho de uma leitura de push/evento/comando.
pub const DEFAULT_BUF_SIZE: usize = 512;
/// Tamanho de uma leitura de mídia.
pub const MEDIA_BUF_SIZE: usize = 1500;

/// Timeout de cada tentativa de enfileirar na saída de um worker.
pub const OUTLET_TIMEOUT: Duration = Duration::from_millis(50);
/// Prazo total do desligamento gracioso do hub.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
/// Maior prazo/timeout aceito na configuração (segundos).
pub const MAX_CONFIG_SECS: f64 = 600.0;

/// Segundos da configuração → `Duration`, limitado a `0..=MAX_CONFIG_SECS`.
/// NaN vira zero.
fn clamped_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_CONFIG_SECS)).unwrap_or(Duration::ZERO)
}

// ──────────────────────────────────────────────
// Erros
// ──────────────────────────────────────────────

/// Erros ao ler ou gravar o `config.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML inválido: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Falha ao gerar TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ──────────────────────────────────────────────
// Seções
// ──────────────────────────────────────────────

/// Conexão com o robô.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// IP do robô (vazio = não configurado)
    pub ip: String,
    /// Timeout da conexão de comandos (segundos)
    pub command_timeout_secs: f64,
}

impl RobotConfig {
    pub fn command_timeout(&self) -> Duration {
        clamped_secs(self.command_timeout_secs)
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            command_timeout_secs: 30.0,
        }
    }
}

/// Portas do robô.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub video: u16,
    pub audio: u16,
    pub ctrl: u16,
    pub push: u16,
    pub event: u16,
    pub ip_broadcast: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            video: VIDEO_PORT,
            audio: AUDIO_PORT,
            ctrl: CTRL_PORT,
            push: PUSH_PORT,
            event: EVENT_PORT,
            ip_broadcast: IP_PORT,
        }
    }
}

/// Parâmetros comuns dos workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bytes por leitura de socket
    pub buffer_size: usize,
    /// Timeout de cada tentativa de enfileirar (ms)
    pub outlet_timeout_ms: u64,
    /// Timeout de leitura, para o loop enxergar o fechamento (ms)
    pub poll_interval_ms: u64,
    /// Buffer do kernel de cada canal de saída (bytes)
    pub channel_buffer_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUF_SIZE,
            outlet_timeout_ms: OUTLET_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 500,
            channel_buffer_bytes: 64 * 1024,
        }
    }
}

impl WorkerConfig {
    pub fn outlet_timeout(&self) -> Duration {
        Duration::from_millis(self.outlet_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Supervisor de processos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Prazo compartilhado do desligamento gracioso (segundos)
    pub shutdown_deadline_secs: f64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            shutdown_deadline_secs: SHUTDOWN_DEADLINE.as_secs_f64(),
        }
    }
}

impl HubConfig {
    pub fn shutdown_deadline(&self) -> Duration {
        clamped_secs(self.shutdown_deadline_secs)
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub robot: RobotConfig,
    pub ports: PortConfig,
    pub worker: WorkerConfig,
    pub hub: HubConfig,
}

impl AppConfig {
    /// Lê e interpreta o arquivo, sem fallback.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Carrega o arquivo; se faltar ou estiver inválido, usa os padrões.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("{} não existe, usando configuração padrão", path.display());
            return Self::default();
        }
        match Self::read(path) {
            Ok(config) => {
                info!("Configuração carregada de {}", path.display());
                config
            }
            Err(e) => {
                warn!("{e}; usando configuração padrão");
                Self::default()
            }
        }
    }

    /// Grava a configuração como TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// `config.toml` no diretório do executável (ou no diretório atual).
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let ports = [
            ("video", self.ports.video),
            ("audio", self.ports.audio),
            ("ctrl", self.ports.ctrl),
            ("push", self.ports.push),
            ("event", self.ports.event),
            ("ip_broadcast", self.ports.ip_broadcast),
        ];
        for (name, port) in ports {
            if port == 0 {
                errors.push(format!("Porta {name} não pode ser 0"));
            }
        }
        if self.worker.buffer_size == 0 {
            errors.push("buffer_size não pode ser 0".into());
        }
        if self.worker.outlet_timeout_ms == 0 {
            errors.push("outlet_timeout_ms não pode ser 0".into());
        }
        if self.worker.poll_interval_ms == 0 {
            errors.push("poll_interval_ms não pode ser 0".into());
        }
        if !(self.hub.shutdown_deadline_secs >= 0.0
            && self.hub.shutdown_deadline_secs <= MAX_CONFIG_SECS)
        {
            errors.push(format!(
                "Prazo de desligamento inválido: {} (0–{MAX_CONFIG_SECS})",
                self.hub.shutdown_deadline_secs
            ));
        }
        if !(self.robot.command_timeout_secs > 0.0
            && self.robot.command_timeout_secs <= MAX_CONFIG_SECS)
        {
            errors.push(format!(
                "Timeout de comandos inválido: {} (0–{MAX_CONFIG_SECS})",
                self.robot.command_timeout_secs
            ));
        }
        if !self.robot.ip.is_empty() && self.robot.ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("IP do robô inválido: {}", self.robot.ip));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn defaults_match_protocol_constants() {
        let config = AppConfig::default();
        assert_eq!(config.ports.push, 40924);
        assert_eq!(config.ports.event, 40925);
        assert_eq!(config.worker.buffer_size, 512);
        assert_eq!(config.worker.outlet_timeout(), Duration::from_millis(50));
        assert_eq!(config.hub.shutdown_deadline(), Duration::from_secs(10));
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.ports.ctrl, parsed.ports.ctrl);
        assert_eq!(config.worker.poll_interval_ms, parsed.worker.poll_interval_ms);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[robot]
ip = "192.168.2.1"

[hub]
shutdown_deadline_secs = 2.5
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.robot.ip, "192.168.2.1");
        assert_eq!(config.hub.shutdown_deadline(), Duration::from_millis(2500));
        // Outros campos devem ter valor padrão
        assert_eq!(config.robot.command_timeout_secs, 30.0);
        assert_eq!(config.ports.push, PUSH_PORT);
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = AppConfig::default();
        config.ports.push = 0;
        config.robot.ip = "not-an-ip".into();
        config.hub.shutdown_deadline_secs = -1.0;
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "Erros: {:?}", errors);
    }

    #[test]
    fn out_of_range_durations_are_clamped() {
        let hub = |secs| HubConfig {
            shutdown_deadline_secs: secs,
        };
        assert_eq!(hub(f64::INFINITY).shutdown_deadline(), Duration::from_secs(600));
        assert_eq!(hub(1e30).shutdown_deadline(), Duration::from_secs(600));
        assert_eq!(hub(-3.0).shutdown_deadline(), Duration::ZERO);
        assert_eq!(hub(f64::NAN).shutdown_deadline(), Duration::ZERO);

        let robot = RobotConfig {
            command_timeout_secs: f64::INFINITY,
            ..RobotConfig::default()
        };
        assert_eq!(robot.command_timeout(), Duration::from_secs(600));
        assert!(!AppConfig {
            robot,
            ..AppConfig::default()
        }
        .validate()
        .is_empty());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let path = std::env::temp_dir().join(format!("robomaster-config-{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.robot.ip = "192.168.42.2".into();
        config.worker.poll_interval_ms = 250;
        config.save(&path).unwrap();

        let loaded = AppConfig::read(&path).unwrap();
        assert_eq!(loaded.robot.ip, "192.168.42.2");
        assert_eq!(loaded.worker.poll_interval(), Duration::from_millis(250));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn save_into_a_directory_is_an_io_error() {
        let dir = std::env::temp_dir();
        assert!(matches!(
            AppConfig::default().save(&dir),
            Err(ConfigError::Io { path, .. }) if path == dir
        ));
    }

    #[test]
    fn broken_toml_is_a_parse_error() {
        let path = std::env::temp_dir().join(format!("robomaster-config-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[hub\nshutdown_deadline_secs = ").unwrap();
        assert!(matches!(AppConfig::read(&path), Err(ConfigError::Parse(_))));
        assert_eq!(AppConfig::load(&path).hub.shutdown_deadline(), SHUTDOWN_DEADLINE);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("robomaster-config-inexistente.toml");
        let config = AppConfig::load(&path);
        assert_eq!(config.ports.video, VIDEO_PORT);
    }
}
