use std::sync::Arc;

use crate::actions::ActionError;
use crate::config::{AppConfig, Backend};
use crate::llm::LlmClient;
use crate::store::MindmapStore;

/// Pareja persistencia/modelo que atiende una petición.
#[derive(Clone)]
pub struct BackendPair {
    pub store: Arc<dyn MindmapStore>,
    pub llm: LlmClient,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sqlite: BackendPair,
    /// Solo disponible si MONGO_URI está configurado.
    pub mongo: Option<BackendPair>,
}

impl AppState {
    /// Resuelve el selector de backend de la petición: ausente = el backend
    /// por defecto; desconocido o no configurado = entrada inválida.
    pub fn pair(&self, selector: Option<&str>) -> Result<&BackendPair, ActionError> {
        let backend = match selector {
            None => self.config.default_backend,
            Some(raw) => Backend::from_str(raw)
                .map_err(|_| ActionError::InvalidInput(format!("backend desconocido: '{raw}'")))?,
        };
        match backend {
            Backend::Sqlite => Ok(&self.sqlite),
            Backend::Mongo => self.mongo.as_ref().ok_or_else(|| {
                ActionError::InvalidInput(
                    "el backend 'mongo' no está configurado (falta MONGO_URI)".to_string(),
                )
            }),
        }
    }
}
