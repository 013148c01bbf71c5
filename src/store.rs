//! Contrato de persistencia de mindmaps y normalización entre backends.
//!
//! Las dos implementaciones (SQLite y MongoDB) cumplen el mismo contrato
//! externo; la tolerancia a las diferencias históricas entre escritores
//! (casing de claves, timestamps nativos vs texto, autores como string o
//! lista, árbol serializado como texto) vive aquí, en funciones puras sobre
//! `serde_json::Value`, para que ambos backends lean exactamente igual.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{MindmapItem, MindmapNode};

/// Error de la capa de persistencia. La ausencia de un registro NO es un
/// error: `get_by_id` devuelve `None` y `update`/`delete` devuelven `false`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ya existe un mindmap con id '{0}'")]
    AlreadyExists(String),
    #[error("error de SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("error de MongoDB: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("error de BSON: {0}")]
    Bson(#[from] bson::ser::Error),
    #[error("error de serialización: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Contrato común de los dos backends de persistencia.
#[async_trait]
pub trait MindmapStore: Send + Sync {
    /// Crea el documento. Si el id viene vacío genera uno aleatorio; si ya
    /// existe un registro con ese id falla con `AlreadyExists` sin tocarlo.
    /// Devuelve el id definitivo.
    async fn create(&self, item: MindmapItem) -> Result<String, StoreError>;

    /// Devuelve el documento completo, o `None` si no existe.
    async fn get_by_id(&self, id: &str) -> Result<Option<MindmapItem>, StoreError>;

    /// Fusión superficial a nivel de documento: cada clave de `fields`
    /// sobrescribe el campo correspondiente, el resto queda intacto.
    /// Devuelve `false` si el documento no existe.
    async fn update(&self, id: &str, fields: Map<String, Value>) -> Result<bool, StoreError>;

    /// Borra el documento. Devuelve si existía algo que borrar.
    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError>;

    /// Lista todos los documentos; con el almacén vacío devuelve una lista
    /// vacía, nunca un valor ausente.
    async fn list_all(&self) -> Result<Vec<MindmapItem>, StoreError>;
}

/// Timestamp actual en ISO-8601, el formato canónico de ambos backends.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Busca una clave probando varias grafías: tal cual, con la inicial en
/// mayúscula y con la inicial en minúscula. Escritores antiguos guardaron
/// campos con casing inconsistente.
pub fn lookup<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = data.get(key) {
        return Some(value);
    }
    for candidate in [flip_first(key, true), flip_first(key, false)] {
        if candidate != key {
            if let Some(value) = data.get(&candidate) {
                return Some(value);
            }
        }
    }
    None
}

fn flip_first(key: &str, upper: bool) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => {
            let first = if upper {
                first.to_ascii_uppercase()
            } else {
                first.to_ascii_lowercase()
            };
            std::iter::once(first).chain(chars).collect()
        }
        None => String::new(),
    }
}

/// Lee un campo como texto, tolerando valores escalares no-string.
pub fn string_field(data: &Map<String, Value>, key: &str) -> String {
    match lookup(data, key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Normaliza un timestamp a ISO-8601. Acepta:
/// - texto ya formateado;
/// - `{"$date": "..."}` / `{"$date": {"$numberLong": "ms"}}` (JSON extendido
///   de BSON, el representante del timestamp nativo del backend);
/// - `{"seconds": n}` / `{"_seconds": n}`;
/// - un número de segundos Unix.
pub fn iso_timestamp(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_as_seconds(n).map(epoch_to_iso).unwrap_or_default(),
        Value::Object(map) => {
            if let Some(date) = map.get("$date") {
                return match date {
                    Value::String(s) => s.clone(),
                    Value::Object(inner) => inner
                        .get("$numberLong")
                        .and_then(Value::as_str)
                        .and_then(|ms| ms.parse::<i64>().ok())
                        .map(millis_to_iso)
                        .unwrap_or_default(),
                    _ => String::new(),
                };
            }
            for key in ["_seconds", "seconds"] {
                if let Some(Value::Number(n)) = map.get(key) {
                    return number_as_seconds(n).map(epoch_to_iso).unwrap_or_default();
                }
            }
            String::new()
        }
        _ => String::new(),
    }
}

fn number_as_seconds(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))
}

fn epoch_to_iso(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

fn millis_to_iso(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

/// Normaliza la lista de autores: acepta un string suelto, una lista de
/// strings o una lista mixta.
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Normaliza el árbol: acepta la estructura anidada o un string con la
/// estructura serializada (parse-on-read).
pub fn tree_value(value: &Value) -> MindmapNode {
    match value {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_default(),
        Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_default(),
        _ => MindmapNode::default(),
    }
}

/// Reconstruye un `MindmapItem` a partir del mapa crudo que devolvió el
/// backend, aplicando toda la normalización anterior.
pub fn item_from_map(id: String, data: Map<String, Value>) -> MindmapItem {
    MindmapItem {
        id,
        filename: string_field(&data, "filename"),
        title: string_field(&data, "title"),
        authors: lookup(&data, "authors").map(string_list).unwrap_or_default(),
        date: string_field(&data, "date"),
        mindmap_data: lookup(&data, "mindmapData").map(tree_value).unwrap_or_default(),
        pdf_text: string_field(&data, "pdfText"),
        created_at: lookup(&data, "createdAt").map(iso_timestamp).unwrap_or_default(),
        updated_at: lookup(&data, "updatedAt").map(iso_timestamp).unwrap_or_default(),
    }
}


/// Suite de contrato compartida: cualquier backend que implemente
/// `MindmapStore` debe pasarla tal cual, de modo que una divergencia de
/// comportamiento entre los dos se detecte mecánicamente.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use serde_json::json;

    fn sample_item(id: &str) -> MindmapItem {
        MindmapItem {
            id: id.to_string(),
            filename: "paper.pdf".to_string(),
            title: "Atención neuronal".to_string(),
            authors: vec!["Ana Pérez".to_string(), "Luis Gómez".to_string()],
            date: "June 2017".to_string(),
            mindmap_data: MindmapNode {
                name: "Raíz".to_string(),
                tooltip: "Tema principal".to_string(),
                section: "Documento".to_string(),
                pages: "1-10".to_string(),
                children: vec![MindmapNode {
                    name: "Introducción".to_string(),
                    ..MindmapNode::default()
                }],
            },
            pdf_text: "texto completo".to_string(),
            created_at: "2024-05-01T12:00:00+00:00".to_string(),
            updated_at: "2024-05-01T12:00:00+00:00".to_string(),
        }
    }

    pub async fn exercise(store: &dyn MindmapStore) {
        // Almacén vacío: lista vacía, nunca ausente.
        assert!(store.list_all().await.unwrap().is_empty());

        // create sin id asigna uno nuevo.
        let id = store.create(sample_item("")).await.unwrap();
        assert!(!id.is_empty());

        // create con un id ya usado falla sin mutar el registro existente.
        let mut duplicate = sample_item(&id);
        duplicate.title = "Título intruso".to_string();
        match store.create(duplicate).await {
            Err(StoreError::AlreadyExists(existing)) => assert_eq!(existing, id),
            other => panic!("se esperaba AlreadyExists, llegó {other:?}"),
        }
        let stored = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Atención neuronal");
        assert_eq!(stored.authors, vec!["Ana Pérez", "Luis Gómez"]);
        assert_eq!(stored.mindmap_data.children.len(), 1);

        // create con id explícito lo respeta.
        let explicit = store.create(sample_item("id-fijo")).await.unwrap();
        assert_eq!(explicit, "id-fijo");

        // get de un id inexistente devuelve None, no error.
        assert!(store.get_by_id("no-existe").await.unwrap().is_none());

        // update parcial: solo los campos mencionados cambian.
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!("Título revisado"));
        fields.insert("updatedAt".to_string(), json!("2024-06-01T00:00:00+00:00"));
        assert!(store.update(&id, fields).await.unwrap());
        let updated = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(updated.title, "Título revisado");
        assert_eq!(updated.updated_at, "2024-06-01T00:00:00+00:00");
        assert_eq!(updated.filename, "paper.pdf");
        assert_eq!(updated.authors, vec!["Ana Pérez", "Luis Gómez"]);
        assert_eq!(updated.created_at, "2024-05-01T12:00:00+00:00");

        // update del árbol completo (el caso de las acciones de nodo).
        let mut tree_fields = Map::new();
        let mut new_tree = sample_item("").mindmap_data;
        new_tree.children[0].tooltip = "Contexto ampliado".to_string();
        tree_fields.insert(
            "mindmapData".to_string(),
            serde_json::to_value(&new_tree).unwrap(),
        );
        assert!(store.update(&id, tree_fields).await.unwrap());
        let retree = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(retree.mindmap_data.children[0].tooltip, "Contexto ampliado");

        // update y delete de ids inexistentes informan ausencia, no error.
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!("da igual"));
        assert!(!store.update("no-existe", fields).await.unwrap());
        assert!(!store.delete_by_id("no-existe").await.unwrap());

        // list_all incluye lo creado.
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|item| item.id == id));
        assert!(all.iter().any(|item| item.id == "id-fijo"));

        // delete informa si borró algo.
        assert!(store.delete_by_id(&id).await.unwrap());
        assert!(store.get_by_id(&id).await.unwrap().is_none());
        assert!(store.delete_by_id("id-fijo").await.unwrap());
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
