//! Persistencia local del token de sesión (bearer token).
//!
//! El token se guarda en un fichero plano para que la sesión sobreviva a
//! reinicios de la consola. Un 401 del backend lo invalida globalmente.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

/// Almacén del token en disco.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Lee el token persistido, si existe y no está vacío.
    pub fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim().to_string();
                if token.is_empty() {
                    None
                } else {
                    Some(token)
                }
            }
            Err(_) => None,
        }
    }

    /// Persiste el token, creando los directorios intermedios si hace falta.
    pub fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("No se pudo crear {}", parent.display()))?;
        }
        fs::write(&self.path, token)
            .with_context(|| format!("No se pudo escribir el token en {}", self.path.display()))
    }

    /// Borra el token persistido. Ignora el caso de que no exista.
    pub fn clear(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("No se pudo borrar el fichero de token: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn guarda_y_recupera_token() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("sub").join("token"));

        assert_eq!(store.load(), None);
        store.save("abc123").unwrap();
        assert_eq!(store.load(), Some("abc123".to_string()));
    }

    #[test]
    fn clear_elimina_el_token() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token"));

        store.save("abc123").unwrap();
        store.clear();
        assert_eq!(store.load(), None);

        // Borrar dos veces no falla.
        store.clear();
    }

    #[test]
    fn token_vacio_cuenta_como_ausente() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token"));

        store.save("   \n").unwrap();
        assert_eq!(store.load(), None);
    }
}
