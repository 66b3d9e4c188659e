//! Máquina de estados de construcción del grafo de conocimiento.
//!
//! Refleja en el cliente el pipeline asíncrono del backend
//! (subida → procesado → extracción de entidades → construcción → listo) y
//! garantiza sus invariantes:
//!   - `progress` sólo está definido durante la fase `Building`.
//!   - Los contadores son acumulativos y nunca decrecen dentro de un ciclo.
//!   - Los totales finales sólo se fijan al llegar a `Ready`.
//!   - Un fallo conserva los contadores previos y marca la fase `Error`.
//!   - Un borrado vuelve incondicionalmente a `Offline` con todo limpio.

use serde::{Deserialize, Serialize};

/// Fase discreta de construcción del grafo. Exactamente una activa a la vez.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    #[default]
    Offline,
    Processed,
    EntitiesExtracted,
    Building,
    Ready,
    Error,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Offline => "desconectado",
            Self::Processed => "PDFs procesados",
            Self::EntitiesExtracted => "entidades extraídas",
            Self::Building => "construyendo",
            Self::Ready => "listo",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Actualización monótona de contadores tras una llamada del pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterUpdate {
    pub pdfs_processed: Option<u64>,
    pub chunks_created: Option<u64>,
    pub entities_extracted: Option<u64>,
    pub relationships_created: Option<u64>,
    pub entity_count: Option<u64>,
    pub relationship_count: Option<u64>,
}

/// Fuente única de verdad del progreso de construcción del grafo.
///
/// Deserializa directamente la respuesta `/KG-status/status` del backend
/// (claves camelCase en el cable).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildStatus {
    #[serde(rename = "status")]
    pub phase: BuildPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Entero en [0,100]; sólo tiene significado mientras `phase == Building`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, rename = "pdfsProcessed", skip_serializing_if = "Option::is_none")]
    pub pdfs_processed: Option<u64>,
    #[serde(default, rename = "chunksCreated", skip_serializing_if = "Option::is_none")]
    pub chunks_created: Option<u64>,
    #[serde(default, rename = "entitiesExtracted", skip_serializing_if = "Option::is_none")]
    pub entities_extracted: Option<u64>,
    #[serde(default, rename = "relationshipsCreated", skip_serializing_if = "Option::is_none")]
    pub relationships_created: Option<u64>,
    #[serde(default, rename = "entityCount", skip_serializing_if = "Option::is_none")]
    pub entity_count: Option<u64>,
    #[serde(default, rename = "relationshipCount", skip_serializing_if = "Option::is_none")]
    pub relationship_count: Option<u64>,
}

impl BuildStatus {
    /// Estado inicial: sin grafo, sin contadores.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Estado optimista al iniciar una sub-etapa del pipeline.
    pub fn begin_stage(&mut self, stage: &str, progress: u8) {
        self.phase = BuildPhase::Building;
        self.stage = Some(stage.to_string());
        self.progress = Some(progress.min(100));
        self.message = None;
    }

    /// Estado optimista tras una extracción de entidades con éxito:
    /// "entidades listas, grafo aún sin construir". El refresco canónico
    /// posterior lo supersede.
    pub fn entities_ready(&mut self, update: CounterUpdate) {
        self.merge_counters(update);
        self.phase = BuildPhase::EntitiesExtracted;
        self.stage = Some("Entidades extraídas".to_string());
        self.progress = None;
        self.message = Some("Las entidades se han extraído correctamente.".to_string());
    }

    /// Estado optimista tras `build-kg`: construyendo relaciones, 75 %.
    pub fn building_relationships(&mut self, update: CounterUpdate) {
        self.merge_counters(update);
        self.phase = BuildPhase::Building;
        self.stage = Some("Construyendo relaciones…".to_string());
        self.progress = Some(75);
        self.message = None;
    }

    /// Estado optimista tras `update-kg`: grafo listo, totales finales.
    pub fn ready(&mut self, update: CounterUpdate) {
        self.merge_counters(update);
        self.phase = BuildPhase::Ready;
        self.stage = None;
        self.progress = None;
        self.message =
            Some("El grafo de conocimiento está listo para consultas.".to_string());
    }

    /// Marca la fase `Error` conservando los contadores para diagnóstico.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.phase = BuildPhase::Error;
        self.message = Some(message.into());
        self.stage = None;
        self.progress = None;
    }

    /// Borrado del grafo: vuelta incondicional a `Offline`, todo limpio.
    pub fn reset(&mut self) {
        *self = Self::offline();
    }

    /// Reconciliación con el estado canónico del backend: el fetch gana.
    ///
    /// Los contadores se funden de forma monótona (el backend puede omitir
    /// contadores que el cliente ya conoce, p. ej. `chunksCreated`), salvo
    /// cuando el canónico es `Offline`, que representa un backend vaciado y
    /// sustituye todo.
    pub fn absorb(&mut self, canonical: BuildStatus) {
        if canonical.phase == BuildPhase::Offline {
            *self = canonical;
            return;
        }

        let previous = self.clone();
        *self = canonical;
        self.merge_counters(previous.as_counter_update());

        // Invariante: progreso sólo durante la construcción.
        if self.phase != BuildPhase::Building {
            self.progress = None;
        }
    }

    /// ¿Hay material para lanzar (o reintentar) la extracción de entidades?
    pub fn can_extract(&self) -> bool {
        match self.phase {
            BuildPhase::Processed | BuildPhase::EntitiesExtracted | BuildPhase::Ready => true,
            BuildPhase::Error => self.pdfs_processed.unwrap_or(0) > 0,
            BuildPhase::Offline | BuildPhase::Building => false,
        }
    }

    /// ¿Hay entidades suficientes para construir (o reconstruir) el grafo?
    pub fn can_build(&self) -> bool {
        match self.phase {
            BuildPhase::EntitiesExtracted | BuildPhase::Ready => true,
            BuildPhase::Error => self.entities_extracted.unwrap_or(0) > 0,
            BuildPhase::Offline | BuildPhase::Processed | BuildPhase::Building => false,
        }
    }

    fn as_counter_update(&self) -> CounterUpdate {
        CounterUpdate {
            pdfs_processed: self.pdfs_processed,
            chunks_created: self.chunks_created,
            entities_extracted: self.entities_extracted,
            relationships_created: self.relationships_created,
            entity_count: self.entity_count,
            relationship_count: self.relationship_count,
        }
    }

    fn merge_counters(&mut self, update: CounterUpdate) {
        bump(&mut self.pdfs_processed, update.pdfs_processed);
        bump(&mut self.chunks_created, update.chunks_created);
        bump(&mut self.entities_extracted, update.entities_extracted);
        bump(&mut self.relationships_created, update.relationships_created);
        bump(&mut self.entity_count, update.entity_count);
        bump(&mut self.relationship_count, update.relationship_count);
    }
}

/// Avanza un contador acumulativo sin permitir que decrezca.
fn bump(current: &mut Option<u64>, incoming: Option<u64>) {
    if let Some(value) = incoming {
        *current = Some(current.map_or(value, |c| c.max(value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(
        pdfs: Option<u64>,
        chunks: Option<u64>,
        entities: Option<u64>,
        relations: Option<u64>,
    ) -> CounterUpdate {
        CounterUpdate {
            pdfs_processed: pdfs,
            chunks_created: chunks,
            entities_extracted: entities,
            relationships_created: relations,
            ..Default::default()
        }
    }

    #[test]
    fn secuencia_feliz_contadores_monotonos_y_totales_solo_en_ready() {
        let mut status = BuildStatus::offline();
        assert_eq!(status.phase, BuildPhase::Offline);

        // El backend reporta PDFs procesados en el refresco canónico.
        status.absorb(BuildStatus {
            phase: BuildPhase::Processed,
            pdfs_processed: Some(2),
            ..Default::default()
        });
        assert_eq!(status.phase, BuildPhase::Processed);
        assert_eq!(status.entity_count, None);

        status.begin_stage("Extrayendo entidades…", 0);
        assert_eq!(status.phase, BuildPhase::Building);
        assert_eq!(status.progress, Some(0));

        status.entities_ready(update(Some(2), Some(40), Some(17), None));
        assert_eq!(status.phase, BuildPhase::EntitiesExtracted);
        assert_eq!(status.entities_extracted, Some(17));
        assert_eq!(status.progress, None);
        assert_eq!(status.entity_count, None);

        status.building_relationships(update(Some(2), Some(40), Some(17), Some(9)));
        assert_eq!(status.phase, BuildPhase::Building);
        assert_eq!(status.stage.as_deref(), Some("Construyendo relaciones…"));
        assert_eq!(status.progress, Some(75));

        status.ready(CounterUpdate {
            entity_count: Some(17),
            relationship_count: Some(9),
            ..update(Some(2), Some(40), Some(17), Some(9))
        });
        assert_eq!(status.phase, BuildPhase::Ready);
        assert_eq!(status.entity_count, Some(17));
        assert_eq!(status.relationship_count, Some(9));
        assert_eq!(status.progress, None);

        // Ningún contador ha decrecido en todo el ciclo.
        assert_eq!(status.pdfs_processed, Some(2));
        assert_eq!(status.chunks_created, Some(40));
    }

    #[test]
    fn reset_desde_cualquier_fase_deja_todo_limpio() {
        let fases = [
            BuildPhase::Offline,
            BuildPhase::Processed,
            BuildPhase::EntitiesExtracted,
            BuildPhase::Building,
            BuildPhase::Ready,
            BuildPhase::Error,
        ];
        for fase in fases {
            let mut status = BuildStatus {
                phase: fase,
                stage: Some("x".into()),
                progress: (fase == BuildPhase::Building).then_some(50),
                message: Some("y".into()),
                pdfs_processed: Some(1),
                chunks_created: Some(2),
                entities_extracted: Some(3),
                relationships_created: Some(4),
                entity_count: Some(5),
                relationship_count: Some(6),
            };
            status.reset();
            assert_eq!(status, BuildStatus::offline());
        }
    }

    #[test]
    fn fail_conserva_contadores_previos() {
        let mut status = BuildStatus::offline();
        status.absorb(BuildStatus {
            phase: BuildPhase::Processed,
            pdfs_processed: Some(3),
            chunks_created: Some(60),
            ..Default::default()
        });

        status.begin_stage("Extrayendo entidades…", 0);
        status.fail("Error al extraer entidades: fallo de red");

        assert_eq!(status.phase, BuildPhase::Error);
        assert!(status.message.as_deref().unwrap().contains("fallo de red"));
        assert_eq!(status.pdfs_processed, Some(3));
        assert_eq!(status.chunks_created, Some(60));
        assert_eq!(status.progress, None);
    }

    #[test]
    fn absorb_no_pierde_contadores_que_el_backend_omite() {
        let mut status = BuildStatus::offline();
        status.building_relationships(update(Some(2), Some(40), Some(17), Some(9)));

        // El endpoint de estado no reporta chunksCreated ni relationshipsCreated.
        status.absorb(BuildStatus {
            phase: BuildPhase::Ready,
            pdfs_processed: Some(2),
            entities_extracted: Some(17),
            entity_count: Some(20),
            relationship_count: Some(11),
            ..Default::default()
        });

        assert_eq!(status.phase, BuildPhase::Ready);
        assert_eq!(status.chunks_created, Some(40));
        assert_eq!(status.relationships_created, Some(9));
        assert_eq!(status.entity_count, Some(20));
    }

    #[test]
    fn absorb_offline_sustituye_todo() {
        let mut status = BuildStatus::offline();
        status.building_relationships(update(Some(2), Some(40), Some(17), Some(9)));

        status.absorb(BuildStatus::offline());
        assert_eq!(status, BuildStatus::offline());
    }

    #[test]
    fn absorb_limpia_progress_fuera_de_building() {
        let mut status = BuildStatus::offline();
        status.begin_stage("Procesando PDFs…", 10);

        status.absorb(BuildStatus {
            phase: BuildPhase::Ready,
            progress: Some(100),
            ..Default::default()
        });
        assert_eq!(status.progress, None);
    }

    #[test]
    fn precondiciones_extract_y_build() {
        let mut status = BuildStatus::offline();
        assert!(!status.can_extract());
        assert!(!status.can_build());

        status.absorb(BuildStatus {
            phase: BuildPhase::Processed,
            pdfs_processed: Some(1),
            ..Default::default()
        });
        assert!(status.can_extract());
        assert!(!status.can_build());

        status.entities_ready(update(Some(1), None, Some(5), None));
        assert!(status.can_build());

        // Tras un fallo, el reintento del mismo paso sigue permitido
        // gracias a los contadores conservados.
        status.fail("fallo");
        assert!(status.can_extract());
        assert!(status.can_build());
    }

    #[test]
    fn deserializa_la_respuesta_camel_case_del_backend() {
        let raw = r#"{
            "status": "ready",
            "message": "Knowledge Graph is ready for queries",
            "pdfsProcessed": 2,
            "entitiesExtracted": 17,
            "entityCount": 20,
            "relationshipCount": 11
        }"#;
        let status: BuildStatus = serde_json::from_str(raw).unwrap();
        assert_eq!(status.phase, BuildPhase::Ready);
        assert_eq!(status.pdfs_processed, Some(2));
        assert_eq!(status.entity_count, Some(20));
        assert_eq!(status.chunks_created, None);
    }
}
