//! Cola local de subida de PDFs.
//!
//! La cola es propietaria exclusiva de los ficheros locales en estado
//! `Pending`/`Uploading`; para todo lo ya subido, el registro autoritativo es
//! el del backend y cada reconciliación lo sobreescribe.

use std::path::{Path, PathBuf};

use mime_guess::MimeGuess;
use tracing::warn;

use crate::models::{FileRecord, FileState};

/// Resultado de intentar encolar un fichero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Aceptado como `Pending`; contiene el id temporal asignado.
    Staged(String),
    /// Ya existe un fichero con el mismo (nombre, tamaño).
    Duplicate,
    /// No es un PDF; se informa pero no es fatal.
    NotPdf,
}

#[derive(Debug, Default)]
pub struct FileQueue {
    files: Vec<FileRecord>,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vista de sólo lectura de la cola.
    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn has_pending(&self) -> bool {
        self.files.iter().any(|f| f.state == FileState::Pending)
    }

    /// Ficheros locales pendientes de subir, como (nombre, ruta).
    pub fn pending_paths(&self) -> Vec<(String, PathBuf)> {
        self.files
            .iter()
            .filter(|f| f.state == FileState::Pending)
            .filter_map(|f| f.path.clone().map(|p| (f.name.clone(), p)))
            .collect()
    }

    /// Valida y encola un fichero local.
    ///
    /// Rechaza lo que no sea PDF (por extensión/MIME) y los duplicados
    /// exactos por (nombre, tamaño), en cualquier posición del lote.
    pub fn stage(&mut self, path: &Path, size: u64) -> StageOutcome {
        if !is_pdf(path) {
            return StageOutcome::NotPdf;
        }

        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let is_duplicate = self
            .files
            .iter()
            .any(|f| f.name == name && f.size == size);
        if is_duplicate {
            return StageOutcome::Duplicate;
        }

        let record = FileRecord::staged(name, size, path.to_path_buf());
        let id = record.id.clone();
        self.files.push(record);
        StageOutcome::Staged(id)
    }

    /// Marca todos los `Pending` como `Uploading` con progreso 0.
    pub fn mark_uploading(&mut self) {
        for file in &mut self.files {
            if file.state == FileState::Pending {
                file.state = FileState::Uploading;
                file.progress = 0;
                file.error = None;
            }
        }
    }

    /// Aplica el resultado por-fichero que devuelve el backend tras la
    /// subida, casando cada `Uploading` por nombre.
    pub fn apply_upload_outcomes(&mut self, outcomes: &[(String, bool)]) {
        for file in &mut self.files {
            if file.state != FileState::Uploading {
                continue;
            }
            let success = outcomes
                .iter()
                .find(|(name, _)| *name == file.name)
                .map(|(_, ok)| *ok)
                .unwrap_or(false);
            if success {
                file.state = FileState::Uploaded;
                file.progress = 100;
                file.error = None;
            } else {
                file.state = FileState::Error;
                file.progress = 0;
                file.error = Some("La subida ha fallado".to_string());
            }
        }
    }

    /// Fallo de transporte durante la subida: todo `Uploading` pasa a error.
    pub fn fail_uploading(&mut self, message: &str) {
        for file in &mut self.files {
            if file.state == FileState::Uploading {
                file.state = FileState::Error;
                file.progress = 0;
                file.error = Some(message.to_string());
            }
        }
    }

    /// Reconcilia la cola con el listado canónico del backend.
    ///
    /// El listado sustituye todo lo que el backend conoce; los ficheros
    /// locales aún `Pending` (no subidos todavía) se conservan al final.
    pub fn reconcile(&mut self, listing: Vec<FileRecord>) {
        let mut next = listing;
        for local in self.files.drain(..) {
            if local.is_local() {
                let known = next
                    .iter()
                    .any(|f| f.name == local.name && f.size == local.size);
                if known {
                    warn!(
                        "El fichero local '{}' ya figura en el backend; se descarta la copia local.",
                        local.name
                    );
                } else {
                    next.push(local);
                }
            }
        }
        self.files = next;
    }

    /// Eliminación local optimista; el refresco posterior es quien confirma.
    pub fn remove(&mut self, id: &str) -> Option<FileRecord> {
        let pos = self.files.iter().position(|f| f.id == id)?;
        Some(self.files.remove(pos))
    }
}

/// ¿Parece un PDF? Se decide por el tipo MIME adivinado de la ruta.
fn is_pdf(path: &Path) -> bool {
    MimeGuess::from_path(path)
        .first()
        .map(|m| m.essence_str() == "application/pdf")
        .unwrap_or(false)
}
