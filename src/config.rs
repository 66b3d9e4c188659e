//! Carga y gestión de configuración del cliente (URL del backend + sesión).

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use url::Url;

/// Configuración completa del cliente de consola.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// URL base del backend KG-RAG, ej. `http://localhost:8000`.
    pub api_url: Url,
    /// Timeout en segundos para las llamadas HTTP. `None` delega en el
    /// comportamiento por defecto del transporte.
    pub http_timeout_secs: Option<u64>,
    /// Fichero donde se persiste el token de sesión.
    pub token_file: PathBuf,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let api_url_str =
            env::var("KG_RAG_API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let api_url = Url::parse(&api_url_str)
            .map_err(|e| anyhow!("KG_RAG_API_URL inválida ({api_url_str}): {e}"))?;

        let http_timeout_secs = match env::var("KG_RAG_HTTP_TIMEOUT_SECS") {
            Ok(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| anyhow!("KG_RAG_HTTP_TIMEOUT_SECS inválido: {raw}"))?,
            ),
            Err(_) => None,
        };

        let token_file = match env::var("KG_RAG_TOKEN_FILE") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_token_file(),
        };

        Ok(Self {
            api_url,
            http_timeout_secs,
            token_file,
        })
    }
}

/// Ruta por defecto del token: `<config_dir>/kg-rag-console/token`.
fn default_token_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kg-rag-console")
        .join("token")
}
