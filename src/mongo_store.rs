//! Backend de persistencia sobre MongoDB: un documento BSON por mindmap,
//! con `_id` igual al id del documento. Las lecturas se convierten a JSON
//! extendido relajado y pasan por la normalización común, de modo que los
//! timestamps nativos (`$date`) y el resto de derivas históricas se leen
//! igual que en el otro backend.

use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::{Client, Collection};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::models::MindmapItem;
use crate::store::{self, MindmapStore, StoreError};

pub struct MongoStore {
    collection: Collection<Document>,
}

impl MongoStore {
    /// Conecta y verifica el acceso con un ping (los fallos de credenciales
    /// aparecen en el arranque, no en la primera petición).
    pub async fn connect(uri: &str, db_name: &str, collection: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        client.database(db_name).run_command(doc! { "ping": 1 }).await?;
        info!("Conexión a MongoDB OK (db '{db_name}', colección '{collection}')");
        Ok(Self {
            collection: client.database(db_name).collection(collection),
        })
    }
}

#[async_trait::async_trait]
impl MindmapStore for MongoStore {
    async fn create(&self, mut item: MindmapItem) -> Result<String, StoreError> {
        if item.id.is_empty() {
            item.id = Uuid::new_v4().to_string();
        }
        let mut document = bson::to_document(&item)?;
        document.remove("id");
        document.insert("_id", item.id.clone());

        match self.collection.insert_one(document).await {
            Ok(_) => Ok(item.id),
            Err(err) if is_duplicate_key(&err) => Err(StoreError::AlreadyExists(item.id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<MindmapItem>, StoreError> {
        let found = self.collection.find_one(doc! { "_id": id }).await?;
        Ok(found.map(document_to_item))
    }

    async fn update(&self, id: &str, fields: Map<String, Value>) -> Result<bool, StoreError> {
        let mut set = Document::new();
        for (field, value) in fields {
            set.insert(field, bson::to_bson(&value)?);
        }
        if set.is_empty() {
            return Ok(self.collection.find_one(doc! { "_id": id }).await?.is_some());
        }
        let result = self
            .collection
            .update_one(doc! { "_id": id }, doc! { "$set": set })
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn list_all(&self) -> Result<Vec<MindmapItem>, StoreError> {
        let mut cursor = self.collection.find(doc! {}).await?;
        let mut items = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            items.push(document_to_item(document));
        }
        Ok(items)
    }
}

/// E11000: violación de índice único sobre `_id`.
fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write)) if write.code == 11000
    )
}

/// Convierte el documento BSON a JSON extendido relajado y lo pasa por la
/// normalización común. Un `DateTime` nativo se vuelve `{"$date": ...}`,
/// que el lector común ya entiende.
fn document_to_item(document: Document) -> MindmapItem {
    let id = document.get_str("_id").unwrap_or_default().to_string();
    let value = Bson::Document(document).into_relaxed_extjson();
    let data = match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    store::item_from_map(id, data)
}
