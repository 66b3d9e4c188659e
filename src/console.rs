//! Sesión interactiva de consola sobre el orquestador.
//!
//! Es la única capa de presentación: lee comandos línea a línea, invoca las
//! operaciones del orquestador y pinta sus vistas de sólo lectura. No toma
//! decisiones de estado por su cuenta.

use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::error;

use crate::models::ChatRole;
use crate::orchestrator::{is_session_fatal, Orchestrator, StageReport};
use crate::status::BuildStatus;

const AYUDA: &str = "\
Comandos disponibles:
  login                     Inicia sesión en el backend
  register                  Registra un usuario nuevo
  logout                    Cierra la sesión actual
  renew                     Renueva el token de sesión
  add <ruta>…               Encola PDFs (ficheros o directorios)
  files                     Lista la cola y los ficheros del backend
  file <id>                 Detalle de un fichero según el backend
  upload                    Sube todos los PDFs pendientes
  rm <id>                   Elimina un fichero por id
  extract                   Extrae entidades de los PDFs procesados
  build                     Construye el grafo de conocimiento
  delete-graph              Borra el grafo y todos los PDFs
  status                    Muestra el estado del grafo
  refresh                   Fuerza un refresco contra el backend
  chat <pregunta>           Pregunta al agente RAG
  log                       Muestra la conversación de esta sesión
  history                   Muestra el histórico de consultas del backend
  stats                     Estadísticas del grafo
  search <texto>            Búsqueda en el grafo
  help                      Esta ayuda
  quit                      Salir";

/// Bucle principal de la sesión. Termina con `quit` o al cerrarse stdin.
pub async fn run(orch: &mut Orchestrator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Cliente KG-RAG. Escribe 'help' para ver los comandos.");
    if !orch.is_authenticated() {
        println!("No hay sesión activa: usa 'login' o 'register'.");
    }

    loop {
        prompt("kg-rag> ").await?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };

        let result = dispatch(orch, &mut lines, command, rest).await;
        match result {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) if is_session_fatal(&e) => {
                println!("La sesión ha expirado. Vuelve a identificarte con 'login'.");
            }
            Err(e) => {
                error!("Fallo en el comando '{command}': {e:#}");
                println!("Error: {e:#}");
            }
        }
    }

    Ok(())
}

/// Ejecuta un comando; devuelve `true` si hay que salir.
async fn dispatch(
    orch: &mut Orchestrator,
    lines: &mut Lines<BufReader<Stdin>>,
    command: &str,
    rest: &str,
) -> Result<bool> {
    match command {
        "quit" | "exit" => return Ok(true),
        "help" => println!("{AYUDA}"),

        "login" => {
            let username = ask(lines, "Usuario: ").await?;
            let password = ask(lines, "Contraseña: ").await?;
            orch.login(&username, &password).await?;
            println!("Sesión iniciada.");
            print_status(orch.status());
        }
        "register" => {
            let username = ask(lines, "Usuario: ").await?;
            let fullname = ask(lines, "Nombre completo: ").await?;
            let password = ask(lines, "Contraseña: ").await?;
            orch.register(&username, &fullname, &password).await?;
            println!("Usuario registrado y sesión iniciada.");
        }
        "logout" => {
            orch.logout().await;
            println!("Sesión cerrada.");
        }
        "renew" => {
            orch.renew_session().await?;
            println!("Token renovado.");
        }

        "add" => {
            if rest.is_empty() {
                println!("Uso: add <ruta> [<ruta>…]");
            } else {
                let paths: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                let report = orch.add_files(&paths)?;
                print_stage_report(&report);
            }
        }
        "files" => print_files(orch),
        "file" => {
            if rest.is_empty() {
                println!("Uso: file <id>");
            } else {
                let info = orch.file_detail(rest).await?;
                println!("Nombre: {}", info.filename);
                println!("Tamaño: {} bytes", info.size);
                println!("Estado: {}", info.status);
                if let Some(at) = info.uploaded_at {
                    println!("Subido: {}", at.format("%Y-%m-%d %H:%M"));
                }
                if let Some(at) = info.processed_at {
                    println!("Procesado: {}", at.format("%Y-%m-%d %H:%M"));
                }
            }
        }
        "upload" => {
            orch.upload_files().await?;
            print_files(orch);
        }
        "rm" => {
            if rest.is_empty() {
                println!("Uso: rm <id>");
            } else {
                orch.delete_file(rest).await?;
                println!("Fichero eliminado.");
            }
        }

        "extract" => {
            orch.extract_entities().await?;
            print_status(orch.status());
        }
        "build" => {
            orch.build_graph().await?;
            print_status(orch.status());
        }
        "delete-graph" => {
            orch.delete_graph().await?;
            println!("Grafo eliminado. Todo vuelve a estar desconectado.");
        }
        "status" => print_status(orch.status()),
        "refresh" => {
            orch.refresh().await?;
            print_status(orch.status());
        }

        "chat" => {
            if rest.is_empty() {
                println!("Uso: chat <pregunta>");
            } else {
                let answer = orch.chat(rest).await?;
                println!("→ {answer}");
            }
        }
        "log" => {
            for msg in orch.chat_log() {
                let who = match msg.role {
                    ChatRole::User => "tú",
                    ChatRole::Assistant => "agente",
                };
                println!("[{}] {who}: {}", msg.timestamp.format("%H:%M:%S"), msg.content);
            }
        }
        "history" => {
            for entry in orch.history().await? {
                let when = entry
                    .timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "—".to_string());
                println!("[{when}] P: {}", entry.query);
                println!("         R: {}", entry.answer);
            }
        }
        "stats" => {
            let stats = orch.graph_stats().await?;
            println!("Nodos: {}", stats.node_count);
            println!("Relaciones: {}", stats.relationship_count);
            if !stats.entity_types.is_empty() {
                println!("Tipos de entidad: {}", stats.entity_types.join(", "));
            }
            if !stats.relationship_types.is_empty() {
                println!("Tipos de relación: {}", stats.relationship_types.join(", "));
            }
        }
        "search" => {
            if rest.is_empty() {
                println!("Uso: search <texto>");
            } else {
                for hit in orch.graph_search(rest, Some(25)).await? {
                    println!("{hit}");
                }
            }
        }

        otro => println!("Comando desconocido: '{otro}'. Escribe 'help'."),
    }
    Ok(false)
}

async fn prompt(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn ask(lines: &mut Lines<BufReader<Stdin>>, question: &str) -> Result<String> {
    prompt(question).await?;
    Ok(lines.next_line().await?.unwrap_or_default().trim().to_string())
}

fn print_stage_report(report: &StageReport) {
    for path in &report.staged {
        println!("  + encolado: {path}");
    }
    for path in &report.duplicates {
        println!("  = duplicado (ya en cola): {path}");
    }
    for path in &report.rejected_non_pdf {
        println!("  ! rechazado (no es PDF): {path}");
    }
}

fn print_files(orch: &Orchestrator) {
    if orch.files().is_empty() {
        println!("No hay ficheros.");
        return;
    }
    println!(
        "{:<38} {:<26} {:>10}  {:<18} {}",
        "id", "nombre", "bytes", "estado", "subido"
    );
    for file in orch.files() {
        let estado = match (&file.error, file.state) {
            (Some(err), _) => format!("{} ({err})", file.state),
            (None, crate::models::FileState::Uploading) => {
                format!("{} ({}%)", file.state, file.progress)
            }
            (None, _) => file.state.to_string(),
        };
        let subido = file
            .uploaded_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "—".to_string());
        println!(
            "{:<38} {:<26} {:>10}  {estado:<18} {subido}",
            file.id, file.name, file.size
        );
    }
}

fn print_status(status: &BuildStatus) {
    println!("Fase: {}", status.phase);
    if let Some(stage) = &status.stage {
        match status.progress {
            Some(p) => println!("Etapa: {stage} ({p}%)"),
            None => println!("Etapa: {stage}"),
        }
    }
    if let Some(message) = &status.message {
        println!("Mensaje: {message}");
    }
    let contadores = [
        ("PDFs procesados", status.pdfs_processed),
        ("Chunks creados", status.chunks_created),
        ("Entidades extraídas", status.entities_extracted),
        ("Relaciones creadas", status.relationships_created),
        ("Total de entidades", status.entity_count),
        ("Total de relaciones", status.relationship_count),
    ];
    for (label, value) in contadores {
        if let Some(v) = value {
            println!("{label}: {v}");
        }
    }
}
