//! Abstracción sobre Rig para invocar al LLM con salida estructurada.
//!
//! La invocación es determinista (temperatura 0, tope fijo de tokens) y
//! resiste fallos transitorios del proveedor: hasta 3 intentos con backoff
//! exponencial (1 s, 2 s). La respuesta se parsea como JSON directamente y,
//! si el modelo la envolvió en prosa, se recorta el primer objeto `{...}`
//! balanceado antes de rendirse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::completion::Prompt;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::LlmProvider;

/// Tope de salida del modelo, común a todos los proveedores.
const MAX_TOKENS: u64 = 4000;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("fallo del proveedor LLM: {message}")]
    Upstream { message: String, transient: bool },
    #[error("no se pudo extraer un objeto JSON de la respuesta del modelo: {raw}")]
    Parse { raw: String },
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream { transient: true, .. })
    }
}

/// Un backend capaz de completar un prompt. Es la costura que permite
/// sustituir al proveedor real por un stub en los tests.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, ModelError>;
}

/// Política de reintentos: acotada y parametrizada para poder probarla sin
/// tiempo real (con el reloj de tokio pausado los sleeps son instantáneos).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

/// Cliente de LLM: un backend más la política de reintentos.
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn ModelBackend>,
    policy: RetryPolicy,
}

impl LlmClient {
    /// Cliente sobre Rig para el proveedor y modelo de chat configurados.
    pub fn new(provider: LlmProvider, chat_model: String) -> Self {
        Self::with_backend(
            Arc::new(RigBackend {
                provider,
                chat_model,
            }),
            RetryPolicy::default(),
        )
    }

    pub fn with_backend(backend: Arc<dyn ModelBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Invoca al modelo y devuelve el objeto JSON de la respuesta.
    ///
    /// Los reintentos son internos: el llamante solo ve el resultado o un
    /// fallo definitivo (de proveedor o de parseo, con el texto crudo para
    /// diagnóstico).
    pub async fn invoke(&self, prompt: &str, system: &str) -> Result<Value, ModelError> {
        let raw = self.complete_with_retry(prompt, system).await?;
        parse_model_json(&raw).ok_or(ModelError::Parse { raw })
    }

    async fn complete_with_retry(&self, prompt: &str, system: &str) -> Result<String, ModelError> {
        let mut delay = self.policy.base_delay;
        let mut attempt = 1;
        loop {
            match self.backend.complete(prompt, system).await {
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        "Fallo transitorio del LLM (intento {attempt}): {err}. Reintentando en {delay:?}..."
                    );
                    tokio::time::sleep(delay).await;
                    delay *= self.policy.multiplier;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Backend real: despacha al proveedor configurado a través de Rig.
struct RigBackend {
    provider: LlmProvider,
    chat_model: String,
}

impl RigBackend {
    /// Modelo de chat por defecto si no se ha configurado otro.
    fn chat_model(&self) -> &str {
        if !self.chat_model.is_empty() {
            return &self.chat_model;
        }
        match self.provider {
            LlmProvider::OpenAI => "gpt-4o-mini",
            LlmProvider::Gemini => "gemini-2.0-flash",
            LlmProvider::Ollama => "llama3.1",
        }
    }

    async fn complete_openai(&self, prompt: &str, system: &str) -> Result<String, ModelError> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let agent = client
            .agent(self.chat_model())
            .preamble(system)
            .temperature(0.0)
            .max_tokens(MAX_TOKENS)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| classify_upstream(e.to_string()))
    }

    async fn complete_gemini(&self, prompt: &str, system: &str) -> Result<String, ModelError> {
        use rig::client::CompletionClient as _;
        use rig::providers::gemini;

        let client = gemini::Client::from_env();
        let agent = client
            .agent(self.chat_model())
            .preamble(system)
            .temperature(0.0)
            .max_tokens(MAX_TOKENS)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| classify_upstream(e.to_string()))
    }
}

#[async_trait]
impl ModelBackend for RigBackend {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, ModelError> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_openai(prompt, system).await,
            LlmProvider::Gemini => self.complete_gemini(prompt, system).await,
            // Para otros proveedores se podrían añadir ramas adicionales.
            ref other => Err(ModelError::Upstream {
                message: format!("Proveedor LLM {other:?} aún no implementado"),
                transient: false,
            }),
        }
    }
}

fn classify_upstream(message: String) -> ModelError {
    let transient = is_transient_error(&message);
    ModelError::Upstream { message, transient }
}

/// Clasifica el error del proveedor: solo rate-limiting y errores de
/// servicio merecen reintento.
fn is_transient_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "throttl",
        "rate limit",
        "429",
        "503",
        "overloaded",
        "unavailable",
        "server error",
    ]
    .iter()
    .any(|marker| lower.contains(marker))
}

/// Parseo en dos fases: primero el texto completo como objeto JSON; si
/// falla, el primer tramo `{...}` balanceado que aparezca en la respuesta.
/// El recorte es una recuperación pragmática, no una garantía.
fn parse_model_json(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if value.is_object() {
            return Some(value);
        }
    }
    let span = balanced_object_span(raw)?;
    serde_json::from_str::<Value>(span)
        .ok()
        .filter(Value::is_object)
}

/// Devuelve el primer objeto `{...}` con llaves balanceadas, respetando
/// strings y escapes para no contar llaves dentro de literales.
fn balanced_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Backend programado para los tests: devuelve respuestas en orden y cuenta
/// las llamadas.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    pub struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<String, ModelError>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedBackend {
        pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn complete(&self, _prompt: &str, _system: &str) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("el backend programado se quedó sin respuestas")
        }
    }

    pub fn transient() -> ModelError {
        ModelError::Upstream {
            message: "429 Too Many Requests".to_string(),
            transient: true,
        }
    }

    pub fn permanent() -> ModelError {
        ModelError::Upstream {
            message: "401 Unauthorized".to_string(),
            transient: false,
        }
    }
}
