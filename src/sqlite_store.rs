//! Backend de persistencia sobre SQLite: una columna por campo del
//! documento, con el árbol y los autores serializados a TEXT (el lector
//! común los reconstruye con parse-on-read).

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::MindmapItem;
use crate::store::{self, MindmapStore, StoreError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS mindmaps (
    id           TEXT PRIMARY KEY,
    filename     TEXT NOT NULL DEFAULT '',
    title        TEXT NOT NULL DEFAULT '',
    authors      TEXT NOT NULL DEFAULT '[]',
    date         TEXT NOT NULL DEFAULT '',
    mindmap_data TEXT NOT NULL DEFAULT '{}',
    pdf_text     TEXT NOT NULL DEFAULT '',
    created_at   TEXT NOT NULL DEFAULT '',
    updated_at   TEXT NOT NULL DEFAULT ''
)";

const SELECT_COLUMNS: &str = "SELECT id, filename, title, authors, date, mindmap_data, \
                              pdf_text, created_at, updated_at FROM mindmaps";

/// Almacén SQLite. Los handlers son async, así que la conexión va detrás de
/// un mutex de tokio; las operaciones son locales y cortas.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait::async_trait]
impl MindmapStore for SqliteStore {
    async fn create(&self, mut item: MindmapItem) -> Result<String, StoreError> {
        if item.id.is_empty() {
            item.id = Uuid::new_v4().to_string();
        }
        let conn = self.conn.lock().await;
        let result = conn.execute(
            "INSERT INTO mindmaps (id, filename, title, authors, date, mindmap_data, \
             pdf_text, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.id,
                item.filename,
                item.title,
                serde_json::to_string(&item.authors)?,
                item.date,
                serde_json::to_string(&item.mindmap_data)?,
                item.pdf_text,
                item.created_at,
                item.updated_at,
            ],
        );
        match result {
            Ok(_) => Ok(item.id),
            Err(err) if is_unique_violation(&err) => Err(StoreError::AlreadyExists(item.id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<MindmapItem>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let item = conn
            .query_row(&sql, params![id], row_to_item)
            .optional()?;
        Ok(item)
    }

    async fn update(&self, id: &str, fields: Map<String, Value>) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;

        let mut assignments = Vec::new();
        let mut values: Vec<String> = Vec::new();
        for (field, value) in &fields {
            let Some(column) = column_for(field) else {
                continue;
            };
            assignments.push(format!("{} = ?{}", column, values.len() + 1));
            values.push(column_text(value));
        }

        if assignments.is_empty() {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM mindmaps WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            return Ok(exists);
        }

        let sql = format!(
            "UPDATE mindmaps SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len() + 1
        );
        values.push(id.to_string());
        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed > 0)
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM mindmaps WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    async fn list_all(&self) -> Result<Vec<MindmapItem>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(SELECT_COLUMNS)?;
        let rows = stmt.query_map([], row_to_item)?;
        let mut items = Vec::new();
        for item in rows {
            items.push(item?);
        }
        Ok(items)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Columna correspondiente a cada campo canónico del documento; las claves
/// desconocidas se ignoran.
fn column_for(field: &str) -> Option<&'static str> {
    match field {
        "filename" => Some("filename"),
        "title" => Some("title"),
        "authors" => Some("authors"),
        "date" => Some("date"),
        "mindmapData" => Some("mindmap_data"),
        "pdfText" => Some("pdf_text"),
        "createdAt" => Some("created_at"),
        "updatedAt" => Some("updated_at"),
        _ => None,
    }
}

/// Todas las columnas son TEXT: los strings se guardan tal cual y cualquier
/// otro valor se serializa a JSON (que el lector común vuelve a parsear).
fn column_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reconstruye el documento pasando la fila por la normalización común:
/// autores y árbol viajan como texto y se parsean al leer.
fn row_to_item(row: &Row<'_>) -> rusqlite::Result<MindmapItem> {
    let id: String = row.get(0)?;
    let mut data = Map::new();
    data.insert("filename".to_string(), Value::String(row.get(1)?));
    data.insert("title".to_string(), Value::String(row.get(2)?));

    let authors_raw: String = row.get(3)?;
    let authors = serde_json::from_str(&authors_raw).unwrap_or(Value::String(authors_raw));
    data.insert("authors".to_string(), authors);

    data.insert("date".to_string(), Value::String(row.get(4)?));
    data.insert("mindmapData".to_string(), Value::String(row.get(5)?));
    data.insert("pdfText".to_string(), Value::String(row.get(6)?));
    data.insert("createdAt".to_string(), Value::String(row.get(7)?));
    data.insert("updatedAt".to_string(), Value::String(row.get(8)?));

    Ok(store::item_from_map(id, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[tokio::test]
    async fn cumple_el_contrato_comun() {
        let store = SqliteStore::open_in_memory().unwrap();
        crate::store::contract::exercise(&store).await;
    }

    #[tokio::test]
    async fn tolera_filas_escritas_por_versiones_antiguas() {
        // Autores como string suelto y árbol con espacios: el lector común
        // debe normalizarlos igualmente.
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO mindmaps (id, filename, title, authors, date, mindmap_data, \
                 pdf_text, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    "viejo",
                    "viejo.pdf",
                    "Título",
                    "Ana Pérez",
                    "2015",
                    r#"{"name":"Raíz","children":[{"name":"Hijo"}]}"#,
                    "texto",
                    "2015-01-01T00:00:00Z",
                    "2015-01-01T00:00:00Z",
                ],
            )
            .unwrap();
        }

        let item = store.get_by_id("viejo").await.unwrap().unwrap();
        assert_eq!(item.authors, vec!["Ana Pérez"]);
        assert_eq!(item.mindmap_data.name, "Raíz");
        assert_eq!(item.mindmap_data.children[0].name, "Hijo");
    }
}
