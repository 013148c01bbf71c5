//! Carga y gestión de configuración de la aplicación (backends + LLM).
//!
//! Todo se resuelve una sola vez en el arranque y se pasa explícitamente a
//! quien lo necesite; no hay estado global perezoso.

use std::env;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Selector de la pareja persistencia/modelo que atiende una petición.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Mongo,
}

impl Backend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            other => Err(anyhow!("Backend no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub admin_password: String,

    pub default_backend: Backend,
    pub sqlite_path: String,
    pub mongo_uri: Option<String>,
    pub mongo_db: String,
    pub mongo_collection: String,

    /// Modelo de chat; vacío = el modelo por defecto de cada proveedor.
    pub llm_chat_model: String,
    /// Proveedor LLM emparejado con cada backend de persistencia.
    pub llm_provider_sqlite: LlmProvider,
    pub llm_provider_mongo: LlmProvider,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let admin_password =
            env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());

        let default_backend_str =
            env::var("DEFAULT_BACKEND").unwrap_or_else(|_| "sqlite".to_string());
        let default_backend = Backend::from_str(&default_backend_str)?;

        let sqlite_path =
            env::var("SQLITE_PATH").unwrap_or_else(|_| "mindmaps.db".to_string());
        let mongo_uri = env::var("MONGO_URI").ok().filter(|uri| !uri.is_empty());
        let mongo_db = env::var("MONGO_DB").unwrap_or_else(|_| "mapamente".to_string());
        let mongo_collection =
            env::var("MONGO_COLLECTION").unwrap_or_else(|_| "mindmaps".to_string());

        if default_backend == Backend::Mongo && mongo_uri.is_none() {
            return Err(anyhow!(
                "DEFAULT_BACKEND=mongo pero falta MONGO_URI en el entorno"
            ));
        }

        let llm_chat_model = env::var("LLM_CHAT_MODEL").unwrap_or_default();
        let llm_provider_sqlite = LlmProvider::from_str(
            &env::var("LLM_PROVIDER_SQLITE").unwrap_or_else(|_| "openai".to_string()),
        )?;
        let llm_provider_mongo = LlmProvider::from_str(
            &env::var("LLM_PROVIDER_MONGO").unwrap_or_else(|_| "gemini".to_string()),
        )?;

        Ok(Self {
            server_addr,
            admin_password,
            default_backend,
            sqlite_path,
            mongo_uri,
            mongo_db,
            mongo_collection,
            llm_chat_model,
            llm_provider_sqlite,
            llm_provider_mongo,
        })
    }
}
