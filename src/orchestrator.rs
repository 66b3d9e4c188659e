//! Orquestador de la sesión: propietario único de la cola de ficheros, del
//! estado de construcción del grafo y del registro de chat.
//!
//! Cada operación mutadora sigue el mismo contrato: estado optimista local,
//! una única llamada al backend, y refresco canónico posterior que siempre
//! gana sobre lo optimista. Los flags `is_*` son el único mecanismo de
//! exclusión: una operación pedida mientras otra del mismo tipo (o del
//! pipeline) está en vuelo se ignora, nunca se encola.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError, FileStatusInfo};
use crate::models::{ChatMessage, ChatRole, FileRecord};
use crate::queue::{FileQueue, StageOutcome};
use crate::status::BuildStatus;

/// Informe de un `add_files`: qué entró y qué se rechazó (no fatal).
#[derive(Debug, Default)]
pub struct StageReport {
    pub staged: Vec<String>,
    pub duplicates: Vec<String>,
    pub rejected_non_pdf: Vec<String>,
}

pub struct Orchestrator {
    api: ApiClient,
    queue: FileQueue,
    status: BuildStatus,
    chat_log: Vec<ChatMessage>,
    is_uploading: bool,
    is_extracting_entities: bool,
    is_building: bool,
}

impl Orchestrator {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            queue: FileQueue::new(),
            status: BuildStatus::offline(),
            chat_log: Vec::new(),
            is_uploading: false,
            is_extracting_entities: false,
            is_building: false,
        }
    }

    // --- Vistas de sólo lectura ---

    pub fn status(&self) -> &BuildStatus {
        &self.status
    }

    pub fn files(&self) -> &[FileRecord] {
        self.queue.files()
    }

    pub fn chat_log(&self) -> &[ChatMessage] {
        &self.chat_log
    }

    pub fn is_authenticated(&self) -> bool {
        self.api.has_token()
    }

    // --- Sesión ---

    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.api.login(username, password).await?;
        info!("Sesión iniciada como '{username}'.");
        self.refresh().await
    }

    pub async fn register(
        &mut self,
        username: &str,
        fullname: &str,
        password: &str,
    ) -> Result<()> {
        self.api.register(username, fullname, password).await?;
        info!("Usuario '{username}' registrado; sesión iniciada.");
        self.refresh().await
    }

    /// Cierra la sesión y desmonta el estado local.
    pub async fn logout(&mut self) {
        self.api.logout().await;
        self.queue = FileQueue::new();
        self.status.reset();
        self.chat_log.clear();
        info!("Sesión cerrada.");
    }

    // --- Refresco canónico ---

    /// Rehidrata estado y listado desde el backend. El resultado del fetch
    /// es autoritativo y supersede cualquier estado optimista previo.
    ///
    /// Un fallo no-401 al consultar el estado se refleja como fase `Error`
    /// (no se propaga); un 401 sí es fatal para la sesión.
    pub async fn refresh(&mut self) -> Result<()> {
        match self.api.kg_status().await {
            Ok(canonical) => self.status.absorb(canonical),
            Err(e @ ApiError::Unauthorized) => return Err(e.into()),
            Err(e) => {
                warn!("No se pudo obtener el estado del grafo: {e}");
                self.status
                    .fail("No se pudo obtener el estado del grafo de conocimiento.");
            }
        }

        match self.api.list_files().await {
            Ok(listing) => {
                let records = listing
                    .into_iter()
                    .filter_map(FileStatusInfo::into_record)
                    .collect();
                self.queue.reconcile(records);
            }
            Err(e @ ApiError::Unauthorized) => return Err(e.into()),
            Err(e) => warn!("No se pudo obtener el listado de ficheros: {e}"),
        }

        Ok(())
    }

    // --- Cola de subida ---

    /// Encola rutas locales. Los directorios se recorren recursivamente;
    /// lo que no sea PDF o ya esté en cola se informa sin abortar el lote.
    pub fn add_files(&mut self, paths: &[PathBuf]) -> Result<StageReport> {
        let mut report = StageReport::default();
        for path in paths {
            if path.is_dir() {
                for entry in walkdir::WalkDir::new(path)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                {
                    self.stage_one(entry.path(), &mut report)?;
                }
            } else {
                self.stage_one(path, &mut report)?;
            }
        }
        Ok(report)
    }

    fn stage_one(&mut self, path: &Path, report: &mut StageReport) -> Result<()> {
        let display = path.display().to_string();
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("No se pudo leer el fichero: {display}"))?;
        match self.queue.stage(path, metadata.len()) {
            StageOutcome::Staged(_) => report.staged.push(display),
            StageOutcome::Duplicate => report.duplicates.push(display),
            StageOutcome::NotPdf => report.rejected_non_pdf.push(display),
        }
        Ok(())
    }

    /// Sube todos los `Pending` en una única llamada. No hace nada si no
    /// hay pendientes o si ya hay una subida en vuelo. Haya éxito o fallo,
    /// después siempre se refresca contra el backend.
    pub async fn upload_files(&mut self) -> Result<()> {
        if self.is_uploading || !self.queue.has_pending() {
            return Ok(());
        }
        self.is_uploading = true;

        let uploads = self.queue.pending_paths();
        self.queue.mark_uploading();
        let result = self.do_upload(uploads).await;
        self.is_uploading = false;

        let refresh_result = self.refresh().await;
        result?;
        refresh_result
    }

    async fn do_upload(&mut self, uploads: Vec<(String, PathBuf)>) -> Result<()> {
        let mut payload = Vec::new();
        for (name, path) in uploads {
            match tokio::fs::read(&path).await {
                Ok(bytes) => payload.push((name, bytes)),
                Err(e) => {
                    self.queue
                        .fail_uploading("La subida ha fallado. Inténtalo de nuevo.");
                    return Err(anyhow::Error::new(e)
                        .context(format!("No se pudo leer {}", path.display())));
                }
            }
        }

        match self.api.upload_files(payload).await {
            Ok(resp) => {
                let outcomes: Vec<(String, bool)> = resp
                    .files
                    .iter()
                    .map(|f| (f.filename.clone(), f.is_success()))
                    .collect();
                self.queue.apply_upload_outcomes(&outcomes);
                info!("Subida completada: {}", resp.message);
                Ok(())
            }
            Err(e) => {
                self.queue
                    .fail_uploading("La subida ha fallado. Inténtalo de nuevo.");
                Err(e.into())
            }
        }
    }

    /// Elimina un fichero: borrado local optimista, llamada al backend y
    /// refresco. Si el borrado falla, el refresco restaura el registro (no
    /// se reinserta especulativamente).
    pub async fn delete_file(&mut self, id: &str) -> Result<()> {
        let removed = match self.queue.remove(id) {
            Some(record) => record,
            None => bail!("No hay ningún fichero con id '{id}' en la cola."),
        };

        // Un fichero aún local no existe en el backend; basta con quitarlo.
        if removed.is_local() {
            return Ok(());
        }

        let backend_id: i64 = removed
            .id
            .parse()
            .with_context(|| format!("Id de backend inválido: {}", removed.id))?;

        let result = self.api.delete_file(backend_id).await;
        let refresh_result = self.refresh().await;
        result.map_err(anyhow::Error::from)?;
        refresh_result
    }

    // --- Pipeline del grafo ---

    /// Lanza la extracción de entidades sobre los PDFs procesados.
    ///
    /// Exclusión mutua con la construcción: si cualquiera de las dos está
    /// en vuelo, la petición se ignora sin tocar estado ni red.
    pub async fn extract_entities(&mut self) -> Result<()> {
        if self.is_extracting_entities || self.is_building {
            return Ok(());
        }
        if !self.status.can_extract() {
            bail!("No hay PDFs procesados de los que extraer entidades.");
        }
        self.is_extracting_entities = true;

        self.status.begin_stage("Extrayendo entidades…", 0);
        let result = self.api.extract_entities().await;
        self.is_extracting_entities = false;

        match result {
            Ok(report) => {
                self.status.entities_ready(report.counters());
                info!("Extracción de entidades completada: {}", report.message);
                self.refresh().await
            }
            Err(e) => {
                self.status.fail(format!("Error al extraer entidades: {e}"));
                Err(anyhow::Error::new(e).context("Error al extraer entidades"))
            }
        }
    }

    /// Construye el grafo en dos pasos encadenados (`build-kg` seguido de
    /// `update-kg`), con estado optimista entre ambos. Una petición mientras
    /// ya hay una construcción en vuelo es un no-op.
    pub async fn build_graph(&mut self) -> Result<()> {
        if self.is_building || self.is_extracting_entities {
            return Ok(());
        }
        if !self.status.can_build() {
            bail!("Primero hay que extraer entidades de los PDFs.");
        }
        self.is_building = true;

        self.status.begin_stage("Procesando PDFs…", 0);
        let result = self.do_build().await;
        self.is_building = false;

        match result {
            Ok(()) => self.refresh().await,
            Err(e) => {
                self.status
                    .fail(format!("Error al construir el grafo de conocimiento: {e}"));
                Err(e)
            }
        }
    }

    async fn do_build(&mut self) -> Result<()> {
        let built = self.api.build_kg().await?;
        self.status.building_relationships(built.counters());
        info!("Grafo construido: {}", built.message);

        let updated = self.api.update_kg().await?;
        self.status.ready(updated.counters());
        info!("Grafo actualizado: {}", updated.message);
        Ok(())
    }

    /// Borra todo el estado del pipeline en el backend (PDFs, chunks y
    /// entidades) y devuelve la máquina a `Offline`.
    pub async fn delete_graph(&mut self) -> Result<()> {
        match self.api.delete_graph_state().await {
            Ok(()) => {
                self.status.reset();
                info!("Grafo de conocimiento eliminado.");
                self.refresh().await
            }
            Err(e) => {
                self.status
                    .fail(format!("Error al borrar el grafo de conocimiento: {e}"));
                Err(e.into())
            }
        }
    }

    // --- Consultas ---

    /// Envía una pregunta al agente RAG y registra ambos turnos en el log
    /// de la sesión.
    pub async fn chat(&mut self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            bail!("La pregunta está vacía.");
        }
        self.chat_log
            .push(ChatMessage::now(ChatRole::User, question));

        match self.api.chat(question).await {
            Ok(resp) => {
                self.chat_log
                    .push(ChatMessage::now(ChatRole::Assistant, resp.answer.clone()));
                Ok(resp.answer)
            }
            Err(e) => {
                self.chat_log.push(ChatMessage::now(
                    ChatRole::Assistant,
                    "Ha ocurrido un error al procesar la pregunta. Inténtalo de nuevo.",
                ));
                Err(e.into())
            }
        }
    }

    /// Renueva el token de la sesión activa.
    pub async fn renew_session(&mut self) -> Result<()> {
        self.api.refresh().await?;
        info!("Token de sesión renovado.");
        Ok(())
    }

    /// Detalle canónico de un fichero ya registrado en el backend.
    pub async fn file_detail(&mut self, id: &str) -> Result<FileStatusInfo> {
        let backend_id: i64 = id
            .parse()
            .with_context(|| format!("Id de backend inválido: {id}"))?;
        Ok(self.api.file_status(backend_id).await?)
    }

    pub async fn history(&mut self) -> Result<Vec<crate::api::QueryHistoryEntry>> {
        Ok(self.api.history().await?)
    }

    pub async fn graph_stats(&mut self) -> Result<crate::api::GraphStats> {
        Ok(self.api.graph_stats().await?)
    }

    pub async fn graph_search(
        &mut self,
        text: &str,
        limit: Option<u64>,
    ) -> Result<Vec<serde_json::Value>> {
        Ok(self.api.graph_search(text, limit).await?)
    }
}

/// ¿El error de una operación invalida la sesión completa?
pub fn is_session_fatal(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized))
}
