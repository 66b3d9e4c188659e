//! Modelos de dominio (ficheros PDF en cola y mensajes de chat).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Estado de ciclo de vida de un fichero subido al backend.
///
/// `Pending`/`Uploading` son estados locales optimistas; a partir de
/// `Uploaded` el estado autoritativo es siempre el que reporta el backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Uploading,
    Uploaded,
    Processed,
    EntitiesExtracted,
    GraphBuilt,
    GraphUpdated,
    Error,
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pendiente",
            Self::Uploading => "subiendo",
            Self::Uploaded => "subido",
            Self::Processed => "procesado",
            Self::EntitiesExtracted => "entidades extraídas",
            Self::GraphBuilt => "grafo construido",
            Self::GraphUpdated => "grafo actualizado",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Un fichero de la cola de subida, local o ya registrado en el backend.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// UUID temporal mientras el fichero es local; id numérico del backend
    /// (como texto) una vez reconciliado.
    pub id: String,
    pub name: String,
    pub size: u64,
    pub state: FileState,
    /// Progreso 0–100, con significado sólo durante `Uploading`.
    pub progress: u8,
    pub error: Option<String>,
    /// Ruta local; sólo para ficheros aún no subidos.
    pub path: Option<PathBuf>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Crea un registro local en estado `Pending` con un id temporal.
    pub fn staged(name: String, size: u64, path: PathBuf) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            size,
            state: FileState::Pending,
            progress: 0,
            error: None,
            path: Some(path),
            uploaded_at: None,
        }
    }

    /// ¿Es un fichero local que todavía no se ha intentado subir?
    pub fn is_local(&self) -> bool {
        matches!(self.state, FileState::Pending) && self.path.is_some()
    }
}

/// Autor de un mensaje de chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Un turno de la conversación con el agente RAG.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn now(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_crea_pending_con_id_temporal() {
        let record = FileRecord::staged("a.pdf".into(), 100, PathBuf::from("/tmp/a.pdf"));
        assert_eq!(record.state, FileState::Pending);
        assert!(record.is_local());
        assert!(!record.id.is_empty());
    }

    #[test]
    fn file_state_en_el_cable_es_snake_case() {
        let json = serde_json::to_string(&FileState::EntitiesExtracted).unwrap();
        assert_eq!(json, "\"entities_extracted\"");
        let back: FileState = serde_json::from_str("\"graph_built\"").unwrap();
        assert_eq!(back, FileState::GraphBuilt);
    }
}
