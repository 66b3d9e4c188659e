//! Cliente HTTP tipado del backend KG-RAG.
//!
//! Cubre los routers de autenticación, ficheros (`/data-loader`), pipeline
//! del grafo (`/KG-status`), consultas (`/query`) y grafo (`/graph`). Todas
//! las llamadas autenticadas adjuntan el bearer token persistido; cualquier
//! 401 limpia el token (memoria y disco) y se trata como error fatal de
//! sesión, independiente de qué llamada lo provocó.

use chrono::NaiveDateTime;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::config::AppConfig;
use crate::models::{FileRecord, FileState};
use crate::status::{BuildStatus, CounterUpdate};
use crate::token_store::TokenStore;

/// Taxonomía de errores de la capa de API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401 del backend: la sesión ha dejado de ser válida.
    #[error("sesión no válida o expirada (401)")]
    Unauthorized,
    /// Respuesta no-2xx distinta de 401, con el `detail` del backend.
    #[error("error del backend ({status}): {detail}")]
    Backend { status: u16, detail: String },
    /// Fallo de transporte (conexión, timeout, cuerpo ilegible).
    #[error("error de transporte: {0}")]
    Transport(#[from] reqwest::Error),
}

// --- Payloads y Respuestas del backend ---

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    fullname: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct QuestionRequest<'a> {
    question: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
}

/// Resultado por-fichero que reporta la subida.
#[derive(Debug, Deserialize)]
pub struct UploadOutcome {
    pub filename: String,
    pub status: String,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files: Vec<UploadOutcome>,
}

/// Un fichero según el listado canónico del backend.
#[derive(Debug, Deserialize)]
pub struct FileStatusInfo {
    #[serde(default)]
    pub id: Option<i64>,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    pub status: FileState,
    #[serde(default)]
    pub uploaded_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub processed_at: Option<NaiveDateTime>,
}

impl FileStatusInfo {
    /// Convierte el registro del backend en un `FileRecord` autoritativo.
    /// Devuelve `None` si el backend envió una entrada sin id (se omite,
    /// con aviso, igual que hacía la reconciliación original).
    pub fn into_record(self) -> Option<FileRecord> {
        let id = match self.id {
            Some(id) => id.to_string(),
            None => {
                warn!("Listado con fichero sin id ('{}'); se omite.", self.filename);
                return None;
            }
        };
        Some(FileRecord {
            id,
            name: self.filename,
            size: self.size,
            state: self.status,
            progress: if self.status == FileState::Pending { 0 } else { 100 },
            error: None,
            path: None,
            uploaded_at: self.uploaded_at.map(|t| t.and_utc()),
        })
    }
}

/// Respuesta de las llamadas del pipeline (`entity-extractor`, `build-kg`,
/// `update-kg`). El backend mezcla claves snake_case y camelCase según la
/// versión, así que se aceptan ambas.
#[derive(Debug, Default, Deserialize)]
pub struct PipelineReport {
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "pdfsProcessed")]
    pub files_processed: Option<u64>,
    #[serde(default, alias = "entitiesExtracted")]
    pub entities_found: Option<u64>,
    #[serde(default, rename = "chunksCreated")]
    pub chunks_created: Option<u64>,
    #[serde(default, rename = "relationshipsCreated")]
    pub relationships_created: Option<u64>,
    #[serde(default, rename = "entityCount")]
    pub entity_count: Option<u64>,
    #[serde(default, rename = "relationshipCount")]
    pub relationship_count: Option<u64>,
}

impl PipelineReport {
    /// Contadores acumulativos que aporta esta respuesta.
    pub fn counters(&self) -> CounterUpdate {
        CounterUpdate {
            pdfs_processed: self.files_processed,
            chunks_created: self.chunks_created,
            entities_extracted: self.entities_found,
            relationships_created: self.relationships_created,
            entity_count: self.entity_count,
            relationship_count: self.relationship_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryHistoryEntry {
    #[allow(dead_code)]
    #[serde(default)]
    pub id: Option<i64>,
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub timestamp: Option<NaiveDateTime>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GraphStats {
    #[serde(default)]
    pub node_count: u64,
    #[serde(default)]
    pub relationship_count: u64,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub relationship_types: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GraphSearchRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
}

// --- Cliente ---

/// Cliente del backend con token de sesión persistido.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
    store: TokenStore,
}

impl ApiClient {
    pub fn new(cfg: &AppConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = cfg.http_timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }
        let http = builder.build()?;

        let store = TokenStore::new(cfg.token_file.clone());
        let token = store.load();

        Ok(Self {
            http,
            base: base_from(&cfg.api_url),
            token,
            store,
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn set_token(&mut self, token: String) {
        if let Err(e) = self.store.save(&token) {
            warn!("No se pudo persistir el token de sesión: {e}");
        }
        self.token = Some(token);
    }

    fn clear_token(&mut self) {
        self.token = None;
        self.store.clear();
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Envía la petición con el bearer token, valida el código de estado y
    /// aplica la política global de 401.
    async fn send_checked(
        &mut self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req.send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("401 del backend: se invalida la sesión local.");
            self.clear_token();
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Backend {
                status: status.as_u16(),
                detail: extract_detail(&body),
            });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&mut self, path: &str) -> Result<T, ApiError> {
        let req = self.http.get(self.endpoint(path));
        let resp = self.send_checked(req).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn post_empty<T: DeserializeOwned>(&mut self, path: &str) -> Result<T, ApiError> {
        let req = self.http.post(self.endpoint(path));
        let resp = self.send_checked(req).await?;
        Ok(resp.json::<T>().await?)
    }

    // --- Autenticación ---

    /// Login con formulario multipart (contrato OAuth2 del backend).
    /// Si tiene éxito, el token queda en memoria y persistido en disco.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ApiError> {
        let form = multipart::Form::new()
            .text("username", username.to_string())
            .text("password", password.to_string());
        let req = self.http.post(self.endpoint("/auth/login")).multipart(form);
        let resp = self.send_checked(req).await?;
        let token: TokenResponse = resp.json().await?;
        self.set_token(token.access_token);
        Ok(())
    }

    /// Registro de usuario; el backend devuelve directamente un token.
    pub async fn register(
        &mut self,
        username: &str,
        fullname: &str,
        password: &str,
    ) -> Result<(), ApiError> {
        let body = RegisterRequest {
            username,
            fullname,
            password,
        };
        let req = self.http.post(self.endpoint("/auth/register")).json(&body);
        let resp = self.send_checked(req).await?;
        let token: TokenResponse = resp.json().await?;
        self.set_token(token.access_token);
        Ok(())
    }

    /// Renueva el token de la sesión actual.
    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        let token: TokenResponse = self.post_empty("/auth/refresh").await?;
        self.set_token(token.access_token);
        Ok(())
    }

    /// Cierra sesión. El token local se limpia siempre, incluso si la
    /// llamada al backend falla (el backend acepta tokens ya expirados).
    pub async fn logout(&mut self) {
        let req = self.http.post(self.endpoint("/auth/logout"));
        match self.send_checked(req).await {
            Ok(_) | Err(ApiError::Unauthorized) => {}
            Err(e) => warn!("La llamada de logout falló: {e}"),
        }
        self.clear_token();
    }

    // --- Ficheros ---

    /// Sube varios PDFs en una única llamada multipart.
    pub async fn upload_files(
        &mut self,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<UploadResponse, ApiError> {
        let mut form = multipart::Form::new();
        for (name, bytes) in files {
            let part = multipart::Part::bytes(bytes)
                .file_name(name)
                .mime_str("application/pdf")?;
            form = form.part("files", part);
        }
        let req = self
            .http
            .post(self.endpoint("/data-loader/upload"))
            .multipart(form);
        let resp = self.send_checked(req).await?;
        Ok(resp.json::<UploadResponse>().await?)
    }

    pub async fn list_files(&mut self) -> Result<Vec<FileStatusInfo>, ApiError> {
        self.get_json("/data-loader/list").await
    }

    pub async fn delete_file(&mut self, id: i64) -> Result<(), ApiError> {
        let req = self
            .http
            .delete(self.endpoint(&format!("/data-loader/delete/{id}")));
        self.send_checked(req).await?;
        Ok(())
    }

    pub async fn file_status(&mut self, id: i64) -> Result<FileStatusInfo, ApiError> {
        self.get_json(&format!("/data-loader/status/{id}")).await
    }

    // --- Pipeline del grafo ---

    /// Estado canónico del grafo de conocimiento.
    pub async fn kg_status(&mut self) -> Result<BuildStatus, ApiError> {
        self.get_json("/KG-status/status").await
    }

    pub async fn extract_entities(&mut self) -> Result<PipelineReport, ApiError> {
        self.post_empty("/KG-status/entity-extractor").await
    }

    pub async fn build_kg(&mut self) -> Result<PipelineReport, ApiError> {
        self.post_empty("/KG-status/build-kg").await
    }

    pub async fn update_kg(&mut self) -> Result<PipelineReport, ApiError> {
        self.post_empty("/KG-status/update-kg").await
    }

    /// Borra PDFs, chunks y entidades del usuario (reset completo).
    pub async fn delete_graph_state(&mut self) -> Result<(), ApiError> {
        let req = self.http.delete(self.endpoint("/KG-status/pdf-status"));
        self.send_checked(req).await?;
        Ok(())
    }

    // --- Consultas y grafo ---

    pub async fn chat(&mut self, question: &str) -> Result<ChatAnswer, ApiError> {
        let body = QuestionRequest { question };
        let req = self.http.post(self.endpoint("/query/chat")).json(&body);
        let resp = self.send_checked(req).await?;
        Ok(resp.json::<ChatAnswer>().await?)
    }

    pub async fn history(&mut self) -> Result<Vec<QueryHistoryEntry>, ApiError> {
        self.get_json("/query/history").await
    }

    pub async fn graph_search(
        &mut self,
        text: &str,
        limit: Option<u64>,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        let body = GraphSearchRequest { query: text, limit };
        let req = self.http.post(self.endpoint("/graph/search")).json(&body);
        let resp = self.send_checked(req).await?;
        Ok(resp.json().await?)
    }

    pub async fn graph_stats(&mut self) -> Result<GraphStats, ApiError> {
        self.get_json("/graph/statistics").await
    }
}

/// Normaliza la URL base: sin barra final, los paths ya la llevan.
fn base_from(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

/// Extrae el campo `detail` de un cuerpo de error FastAPI; si no lo hay,
/// devuelve el cuerpo crudo truncado a algo legible.
fn extract_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(detail) = value.get("detail").and_then(|d| d.as_str()) {
            return detail.to_string();
        }
    }
    let mut raw = body.trim().to_string();
    if raw.len() > 200 {
        raw.truncate(200);
    }
    if raw.is_empty() {
        "respuesta sin detalle".to_string()
    } else {
        raw
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Cliente apuntado a un servidor mockito, con token en un directorio
    /// temporal. El `TempDir` debe sobrevivir al cliente.
    pub(crate) fn test_client(server_url: &str) -> (ApiClient, TempDir) {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig {
            api_url: Url::parse(server_url).unwrap(),
            http_timeout_secs: Some(5),
            token_file: dir.path().join("token"),
        };
        (ApiClient::new(&cfg).unwrap(), dir)
    }

    #[tokio::test]
    async fn login_guarda_el_token_en_memoria_y_disco() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok-abc", "token_type": "bearer"}"#)
            .create_async()
            .await;

        let (mut client, _dir) = test_client(&server.url());
        assert!(!client.has_token());

        client.login("ana", "secreta").await.unwrap();
        assert!(client.has_token());
        assert_eq!(client.store.load(), Some("tok-abc".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn un_401_limpia_el_token_y_es_error_de_sesion() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/KG-status/status")
            .with_status(401)
            .with_body(r#"{"detail": "Could not validate credentials"}"#)
            .create_async()
            .await;

        let (mut client, _dir) = test_client(&server.url());
        client.set_token("tok-caducado".to_string());

        let err = client.kg_status().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(!client.has_token());
        assert_eq!(client.store.load(), None);
    }

    #[tokio::test]
    async fn los_errores_del_backend_exponen_el_detail() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/KG-status/entity-extractor")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail": "Error in entity extraction: boom"}"#)
            .create_async()
            .await;

        let (mut client, _dir) = test_client(&server.url());
        let err = client.extract_entities().await.unwrap_err();
        match err {
            ApiError::Backend { status, detail } => {
                assert_eq!(status, 500);
                assert!(detail.contains("boom"));
            }
            other => panic!("se esperaba Backend, llegó {other:?}"),
        }
    }

    #[tokio::test]
    async fn la_subida_parsea_el_resultado_por_fichero() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/data-loader/upload")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"message": "ok", "files": [
                    {"filename": "A.pdf", "status": "success"},
                    {"filename": "B.pdf", "status": "error"}
                ]}"#,
            )
            .create_async()
            .await;

        let (mut client, _dir) = test_client(&server.url());
        let resp = client
            .upload_files(vec![
                ("A.pdf".to_string(), b"%PDF-1.4 a".to_vec()),
                ("B.pdf".to_string(), b"%PDF-1.4 b".to_vec()),
            ])
            .await
            .unwrap();

        assert_eq!(resp.files.len(), 2);
        assert!(resp.files[0].is_success());
        assert!(!resp.files[1].is_success());
    }

    #[tokio::test]
    async fn el_listado_convierte_registros_y_omite_los_sin_id() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/data-loader/list")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"id": 1, "filename": "A.pdf", "size": 100, "status": "processed",
                     "uploaded_at": "2025-03-01T10:00:00", "processed_at": null},
                    {"id": null, "filename": "raro.pdf", "size": 0, "status": "pending"}
                ]"#,
            )
            .create_async()
            .await;

        let (mut client, _dir) = test_client(&server.url());
        let listing = client.list_files().await.unwrap();
        let records: Vec<_> = listing
            .into_iter()
            .filter_map(FileStatusInfo::into_record)
            .collect();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1");
        assert_eq!(records[0].state, FileState::Processed);
        assert!(records[0].uploaded_at.is_some());
    }

    #[test]
    fn pipeline_report_acepta_ambos_estilos_de_claves() {
        let snake: PipelineReport = serde_json::from_str(
            r#"{"message": "ok", "files_processed": 2, "entities_found": 17}"#,
        )
        .unwrap();
        assert_eq!(snake.counters().pdfs_processed, Some(2));
        assert_eq!(snake.counters().entities_extracted, Some(17));

        let camel: PipelineReport = serde_json::from_str(
            r#"{"pdfsProcessed": 2, "entitiesExtracted": 17, "chunksCreated": 40}"#,
        )
        .unwrap();
        assert_eq!(camel.counters().pdfs_processed, Some(2));
        assert_eq!(camel.counters().chunks_created, Some(40));
    }
}
