// Módulos de la aplicación
mod api;
mod config;
mod console;
mod models;
mod orchestrator;
mod queue;
mod status;
mod token_store;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::orchestrator::{is_session_fatal, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración y construir el cliente de la API
    let cfg = config::AppConfig::from_env()?;
    info!("Backend KG-RAG: {}", cfg.api_url);
    let api = ApiClient::new(&cfg)?;

    // 3. Crear el orquestador de la sesión
    let mut orch = Orchestrator::new(api);

    // 4. Rehidratar el estado desde el backend si hay sesión persistida
    if orch.is_authenticated() {
        info!("Sesión persistida encontrada; rehidratando estado.");
        if let Err(e) = orch.refresh().await {
            if is_session_fatal(&e) {
                warn!("La sesión persistida ha expirado.");
            } else {
                warn!("No se pudo rehidratar el estado inicial: {e:#}");
            }
        }
    }

    // 5. Entrar en el bucle interactivo
    console::run(&mut orch).await?;

    info!("✅ Sesión de consola terminada.");
    Ok(())
}
