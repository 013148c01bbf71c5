//! Acciones sobre mindmaps: ingesta y ediciones dirigidas de nodos.
//!
//! Todas siguen el mismo flujo: recuperar el documento, construir el prompt,
//! invocar al LLM, aplicar la mutación y persistir. Si el modelo falla no se
//! aplica ninguna mutación parcial; si falla la escritura posterior, la
//! mutación se pierde (no hay rollback compensatorio).

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{LlmClient, ModelError};
use crate::mindmap;
use crate::models::{MindmapItem, MindmapNode, NodePatch, PathSegment};
use crate::store::{self, MindmapStore, StoreError};

/// Primeros caracteres del texto que ve el extractor de metadatos.
const METADATA_CHAR_LIMIT: usize = 4000;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no existe ningún mindmap con id '{0}'")]
    DocumentNotFound(String),
    #[error("la ruta no direcciona ningún nodo del mapa")]
    NodePathNotFound,
    #[error("entrada inválida: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------
// INGESTA
// ---------------------------------------------------------------------

const METADATA_SYSTEM: &str = r#"
Eres un analizador de artículos científicos. Extraes el título, todos los
autores y la fecha de publicación del texto que se te da. Devuelves
únicamente JSON válido, sin ningún texto adicional.
"#;

const MINDMAP_SYSTEM: &str = r#"
Eres un experto en crear mapas mentales jerárquicos a partir de artículos
académicos. Produces mapas en JSON con hasta 8 niveles de profundidad. Cada
nodo lleva: name, tooltip, section, pages y, si procede, children. Devuelves
únicamente JSON válido, sin ningún texto adicional.
"#;

fn build_metadata_prompt(pdf_text: &str) -> String {
    format!(
        r#"Extrae el título, todos los autores y la fecha de publicación del
siguiente texto de un artículo. La fecha puede ser solo mes y año, o más
concreta. Devuelve únicamente un objeto JSON con esta estructura:
{{
  "title": "título del artículo",
  "authors": ["autor1", "autor2"],
  "date": "fecha de publicación"
}}

Texto:

{}"#,
        truncate_chars(pdf_text, METADATA_CHAR_LIMIT)
    )
}

fn build_mindmap_prompt(pdf_text: &str) -> String {
    format!(
        r#"Analiza el siguiente texto de un artículo y crea un mapa mental
jerárquico que resuma sus ideas clave. La estructura es un objeto JSON
anidado de hasta 8 niveles, pero empieza con no más de 5.

Para cada nodo indica:
- 'name': nombre conciso del tema
- 'tooltip': de tres a cinco frases, explicación en lenguaje llano del contenido
- 'section': la sección del documento a la que pertenece (p.ej. "Introducción", "2.1 Trabajo relacionado")
- 'pages': string con la(s) página(s) de origen (p.ej. "3" o "5-7"; deben ser exactas)
- 'children': lista de nodos hijos (si procede)

El objeto raíz representa el tema principal del artículo y DEBE llevar una
lista 'children'. Devuelve la respuesta como un objeto JSON exactamente con
este formato:
{{
  "name": "tema principal",
  "tooltip": "explicación",
  "section": "sección",
  "pages": "páginas",
  "children": [
    {{
      "name": "subtema",
      "tooltip": "explicación",
      "section": "sección",
      "pages": "páginas",
      "children": [...]
    }}
  ]
}}

Este es el texto:

{pdf_text}"#
    )
}

/// Ingesta un artículo: dos invocaciones independientes al modelo (metadatos
/// y árbol completo), montaje del documento y alta en el backend.
///
/// Si la extracción de metadatos falla se sigue adelante con el nombre del
/// fichero como título; si falla la generación del árbol, la ingesta se
/// aborta sin crear nada.
pub async fn ingest_paper(
    store: &dyn MindmapStore,
    llm: &LlmClient,
    filename: &str,
    pdf_text: String,
) -> Result<MindmapItem, ActionError> {
    // 1) Metadatos
    let metadata = match llm.invoke(&build_metadata_prompt(&pdf_text), METADATA_SYSTEM).await {
        Ok(value) => value,
        Err(err) => {
            warn!(
                "No se pudieron extraer los metadatos de '{filename}': {err}. \
                 Se usará el nombre del fichero."
            );
            Value::Object(Map::new())
        }
    };

    // 2) Árbol completo
    let tree_raw = llm.invoke(&build_mindmap_prompt(&pdf_text), MINDMAP_SYSTEM).await?;
    let tree: MindmapNode = serde_json::from_value(tree_raw.clone())
        .map_err(|_| ModelError::Parse { raw: tree_raw.to_string() })?;
    if tree.children.is_empty() {
        return Err(ActionError::Model(ModelError::Parse {
            raw: "el modelo devolvió un mapa sin hijos en la raíz".to_string(),
        }));
    }

    // 3) Montar el documento, con fallback al nombre del fichero sin extensión
    let title = match metadata.get("title").and_then(Value::as_str) {
        Some(title) if !title.trim().is_empty() => title.to_string(),
        _ => strip_extension(filename),
    };
    let authors = metadata
        .get("authors")
        .map(store::string_list)
        .unwrap_or_default();
    let date = metadata
        .get("date")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let now = store::now_iso();
    let item = MindmapItem {
        id: String::new(),
        filename: filename.to_string(),
        title,
        authors,
        date,
        mindmap_data: tree,
        pdf_text,
        created_at: now.clone(),
        updated_at: now,
    };

    let id = store.create(item.clone()).await?;
    info!("Ingerido '{filename}' como mindmap {id}");
    Ok(MindmapItem { id, ..item })
}

// ---------------------------------------------------------------------
// ACCIONES DE NODO
// ---------------------------------------------------------------------

const TOOLTIP_SYSTEM: &str = r#"
Eres un experto en explicar conceptos de artículos académicos en lenguaje
llano. Devuelves únicamente un objeto JSON válido con la clave "tooltip",
sin ningún texto adicional.
"#;

const SUBTREE_SYSTEM: &str = MINDMAP_SYSTEM;

const EXPAND_SYSTEM: &str = r#"
Eres un experto en desglosar conceptos de artículos académicos. Devuelves
únicamente un objeto JSON válido con la clave "children", sin ningún texto
adicional.
"#;

fn build_tooltip_prompt(node_name: &str, pdf_text: &str) -> String {
    format!(
        r#"El mapa mental de un artículo tiene un nodo llamado "{node_name}".
Escribe un tooltip nuevo para ese nodo: de tres a cinco frases, en lenguaje
llano y coherente con el texto completo del artículo. Devuelve únicamente:
{{"tooltip": "explicación nueva"}}

Este es el texto del artículo:

{pdf_text}"#
    )
}

fn build_subtree_prompt(node_name: &str, pdf_text: &str) -> String {
    format!(
        r#"El mapa mental de un artículo tiene un nodo llamado "{node_name}".
Genera de nuevo el subárbol de ese nodo a partir del texto del artículo:
devuelve un objeto JSON con el formato de nodo habitual ('name', 'tooltip',
'section', 'pages', 'children'), cuyo 'name' sea "{node_name}" y cuyos
'children' desarrollen el tema en profundidad.

Este es el texto del artículo:

{pdf_text}"#
    )
}

fn build_expand_prompt(node_name: &str, pdf_text: &str) -> String {
    format!(
        r#"El mapa mental de un artículo tiene un nodo hoja llamado
"{node_name}". Propón sus hijos de primer nivel, SOLO un nivel: cada hijo con
'name', 'tooltip', 'section' y 'pages', sin 'children' anidados. Devuelve
únicamente:
{{"children": [{{"name": "...", "tooltip": "...", "section": "...", "pages": "..."}}]}}

Este es el texto del artículo:

{pdf_text}"#
    )
}

/// Regenera el tooltip del nodo direccionado por `path`, dejando intactos el
/// resto de campos del nodo. Devuelve el tooltip nuevo.
pub async fn regenerate_tooltip(
    store: &dyn MindmapStore,
    llm: &LlmClient,
    id: &str,
    path: &[PathSegment],
    node_name: &str,
) -> Result<String, ActionError> {
    let mut item = fetch(store, id).await?;

    let value = llm
        .invoke(&build_tooltip_prompt(node_name, &item.pdf_text), TOOLTIP_SYSTEM)
        .await?;
    let tooltip = value
        .get("tooltip")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ModelError::Parse { raw: value.to_string() })?;

    apply_patch(&mut item, path, &NodePatch::tooltip(tooltip.clone()))?;
    persist_tree(store, id, &item.mindmap_data).await?;
    Ok(tooltip)
}

/// Regenera el subárbol del nodo direccionado: pide al modelo un subárbol
/// fresco con la misma raíz y reemplaza SOLO la lista de hijos del nodo (su
/// name/tooltip/section/pages no se tocan). Devuelve los hijos nuevos.
pub async fn regenerate_subtree(
    store: &dyn MindmapStore,
    llm: &LlmClient,
    id: &str,
    path: &[PathSegment],
    node_name: &str,
) -> Result<Vec<MindmapNode>, ActionError> {
    let mut item = fetch(store, id).await?;

    let value = llm
        .invoke(&build_subtree_prompt(node_name, &item.pdf_text), SUBTREE_SYSTEM)
        .await?;
    let subtree: MindmapNode = serde_json::from_value(value.clone())
        .map_err(|_| ModelError::Parse { raw: value.to_string() })?;
    let children = subtree.children;

    apply_patch(&mut item, path, &NodePatch::children(children.clone()))?;
    persist_tree(store, id, &item.mindmap_data).await?;
    Ok(children)
}

/// Expande un nodo hoja: pide al modelo SOLO los hijos de primer nivel y los
/// cuelga del nodo direccionado. Devuelve los hijos nuevos.
pub async fn expand_node(
    store: &dyn MindmapStore,
    llm: &LlmClient,
    id: &str,
    path: &[PathSegment],
    node_name: &str,
) -> Result<Vec<MindmapNode>, ActionError> {
    let mut item = fetch(store, id).await?;

    let value = llm
        .invoke(&build_expand_prompt(node_name, &item.pdf_text), EXPAND_SYSTEM)
        .await?;
    let children_raw = value
        .get("children")
        .cloned()
        .ok_or_else(|| ModelError::Parse { raw: value.to_string() })?;
    let children: Vec<MindmapNode> = serde_json::from_value(children_raw)
        .map_err(|_| ModelError::Parse { raw: value.to_string() })?;

    apply_patch(&mut item, path, &NodePatch::children(children.clone()))?;
    persist_tree(store, id, &item.mindmap_data).await?;
    Ok(children)
}

// ---------------------------------------------------------------------
// Auxiliares
// ---------------------------------------------------------------------

async fn fetch(store: &dyn MindmapStore, id: &str) -> Result<MindmapItem, ActionError> {
    store
        .get_by_id(id)
        .await?
        .ok_or_else(|| ActionError::DocumentNotFound(id.to_string()))
}

/// Aplica el parche al árbol; no resolver la ruta se comunica como
/// "ruta no encontrada", distinto de cualquier fallo de servidor.
fn apply_patch(
    item: &mut MindmapItem,
    path: &[PathSegment],
    patch: &NodePatch,
) -> Result<(), ActionError> {
    if mindmap::update_node(&mut item.mindmap_data, path, patch) {
        Ok(())
    } else {
        Err(ActionError::NodePathNotFound)
    }
}

/// Reescribe el árbol mutado y el timestamp de modificación del documento.
async fn persist_tree(
    store: &dyn MindmapStore,
    id: &str,
    tree: &MindmapNode,
) -> Result<(), ActionError> {
    let mut fields = Map::new();
    fields.insert(
        "mindmapData".to_string(),
        serde_json::to_value(tree).map_err(StoreError::from)?,
    );
    fields.insert("updatedAt".to_string(), Value::String(store::now_iso()));
    if !store.update(id, fields).await? {
        return Err(ActionError::DocumentNotFound(id.to_string()));
    }
    Ok(())
}

/// Corta por número de caracteres (no bytes) para no partir UTF-8.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

fn strip_extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{permanent, ScriptedBackend};
    use crate::llm::RetryPolicy;
    use crate::sqlite_store::SqliteStore;
    use std::sync::Arc;

    const METADATA_JSON: &str =
        r#"{"title":"Atención neuronal","authors":["Ana Pérez","Luis Gómez"],"date":"June 2017"}"#;

    const TREE_JSON: &str = r#"{
        "name": "Atención neuronal",
        "tooltip": "Tema principal del artículo.",
        "section": "Documento",
        "pages": "1-10",
        "children": [
            {"name": "Introducción", "tooltip": "Contexto.", "section": "1", "pages": "1"},
            {"name": "Métodos", "tooltip": "Cómo se hizo.", "section": "2", "pages": "3-5"},
            {"name": "Conclusiones", "tooltip": "Qué se aprendió.", "section": "5", "pages": "9"}
        ]
    }"#;

    fn scripted(responses: Vec<Result<String, ModelError>>) -> LlmClient {
        LlmClient::with_backend(
            Arc::new(ScriptedBackend::new(responses)),
            RetryPolicy::default(),
        )
    }

    fn leaf_path(index: f64) -> Vec<PathSegment> {
        vec![PathSegment::Field("children".to_string()), PathSegment::Index(index)]
    }

    #[tokio::test]
    async fn ingesta_y_regeneracion_de_tooltip_extremo_a_extremo() {
        let store = SqliteStore::open_in_memory().unwrap();
        let llm = scripted(vec![
            Ok(METADATA_JSON.to_string()),
            Ok(TREE_JSON.to_string()),
        ]);

        let item = ingest_paper(&store, &llm, "atencion.pdf", "texto del artículo".to_string())
            .await
            .unwrap();

        // El listado incluye el documento con los autores como lista y las
        // tres hojas generadas.
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, item.id);
        assert_eq!(all[0].title, "Atención neuronal");
        assert_eq!(all[0].authors, vec!["Ana Pérez", "Luis Gómez"]);
        assert_eq!(all[0].mindmap_data.children.len(), 3);

        // Regenerar el tooltip de la hoja ["children", 1]: solo cambia esa
        // hoja, hermanos y raíz intactos.
        let llm = scripted(vec![Ok(r#"{"tooltip":"Explicación nueva"}"#.to_string())]);
        let tooltip = regenerate_tooltip(&store, &llm, &item.id, &leaf_path(1.0), "Métodos")
            .await
            .unwrap();
        assert_eq!(tooltip, "Explicación nueva");

        let after = store.get_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(after.mindmap_data.children[1].tooltip, "Explicación nueva");
        assert_eq!(after.mindmap_data.children[1].name, "Métodos");
        assert_eq!(
            after.mindmap_data.children[0],
            item.mindmap_data.children[0]
        );
        assert_eq!(
            after.mindmap_data.children[2],
            item.mindmap_data.children[2]
        );
        assert_eq!(after.mindmap_data.name, item.mindmap_data.name);
        assert_eq!(after.mindmap_data.tooltip, item.mindmap_data.tooltip);
    }

    #[tokio::test]
    async fn la_ingesta_tolera_un_fallo_de_metadatos() {
        let store = SqliteStore::open_in_memory().unwrap();
        let llm = scripted(vec![Err(permanent()), Ok(TREE_JSON.to_string())]);

        let item = ingest_paper(&store, &llm, "atencion.pdf", "texto".to_string())
            .await
            .unwrap();

        assert_eq!(item.title, "atencion");
        assert!(item.authors.is_empty());
        assert_eq!(item.date, "");
        assert_eq!(item.mindmap_data.children.len(), 3);
    }

    #[tokio::test]
    async fn la_ingesta_aborta_si_el_arbol_no_llega() {
        let store = SqliteStore::open_in_memory().unwrap();
        let llm = scripted(vec![Ok(METADATA_JSON.to_string()), Err(permanent())]);

        let err = ingest_paper(&store, &llm, "atencion.pdf", "texto".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Model(_)));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn una_raiz_sin_hijos_es_un_fallo_del_modelo() {
        let store = SqliteStore::open_in_memory().unwrap();
        let llm = scripted(vec![
            Ok(METADATA_JSON.to_string()),
            Ok(r#"{"name":"Raíz","tooltip":"t","section":"s","pages":"1"}"#.to_string()),
        ]);

        let err = ingest_paper(&store, &llm, "atencion.pdf", "texto".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Model(_)));
    }

    #[tokio::test]
    async fn el_documento_inexistente_se_distingue_de_otros_fallos() {
        let store = SqliteStore::open_in_memory().unwrap();
        let llm = scripted(vec![]);

        let err = regenerate_tooltip(&store, &llm, "no-existe", &leaf_path(0.0), "Nodo")
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn la_ruta_invalida_no_toca_el_documento() {
        let store = SqliteStore::open_in_memory().unwrap();
        let llm = scripted(vec![
            Ok(METADATA_JSON.to_string()),
            Ok(TREE_JSON.to_string()),
        ]);
        let item = ingest_paper(&store, &llm, "atencion.pdf", "texto".to_string())
            .await
            .unwrap();

        let llm = scripted(vec![Ok(r#"{"tooltip":"x"}"#.to_string())]);
        let err = regenerate_tooltip(&store, &llm, &item.id, &leaf_path(9.0), "Nada")
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::NodePathNotFound));

        let after = store.get_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(after.mindmap_data, item.mindmap_data);
        assert_eq!(after.updated_at, item.updated_at);
    }

    #[tokio::test]
    async fn regenerar_subarbol_reemplaza_los_hijos_conservando_el_nodo() {
        let store = SqliteStore::open_in_memory().unwrap();
        let llm = scripted(vec![
            Ok(METADATA_JSON.to_string()),
            Ok(TREE_JSON.to_string()),
        ]);
        let item = ingest_paper(&store, &llm, "atencion.pdf", "texto".to_string())
            .await
            .unwrap();

        let llm = scripted(vec![Ok(r#"{
            "name": "Métodos",
            "tooltip": "otro tooltip que debe ignorarse",
            "section": "2",
            "pages": "3-5",
            "children": [
                {"name": "Datos", "tooltip": "d", "section": "2.1", "pages": "3"},
                {"name": "Modelo", "tooltip": "m", "section": "2.2", "pages": "4"}
            ]
        }"#
        .to_string())]);

        let children = regenerate_subtree(&store, &llm, &item.id, &leaf_path(1.0), "Métodos")
            .await
            .unwrap();
        assert_eq!(children.len(), 2);

        let after = store.get_by_id(&item.id).await.unwrap().unwrap();
        let node = &after.mindmap_data.children[1];
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0].name, "Datos");
        // El propio nodo conserva su tooltip original.
        assert_eq!(node.tooltip, "Cómo se hizo.");
        assert_eq!(node.name, "Métodos");
    }

    #[tokio::test]
    async fn expandir_una_hoja_le_cuelga_hijos_de_primer_nivel() {
        let store = SqliteStore::open_in_memory().unwrap();
        let llm = scripted(vec![
            Ok(METADATA_JSON.to_string()),
            Ok(TREE_JSON.to_string()),
        ]);
        let item = ingest_paper(&store, &llm, "atencion.pdf", "texto".to_string())
            .await
            .unwrap();

        let llm = scripted(vec![Ok(r#"{"children":[
            {"name": "Resultados previos", "tooltip": "r", "section": "5", "pages": "9"}
        ]}"#
        .to_string())]);

        let children = expand_node(&store, &llm, &item.id, &leaf_path(2.0), "Conclusiones")
            .await
            .unwrap();
        assert_eq!(children.len(), 1);

        let after = store.get_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(
            after.mindmap_data.children[2].children[0].name,
            "Resultados previos"
        );
    }

    #[test]
    fn truncate_chars_no_parte_caracteres_multibyte() {
        let text = "ñandú ñandú";
        assert_eq!(truncate_chars(text, 5), "ñandú");
        assert_eq!(truncate_chars(text, 100), text);
    }

    #[test]
    fn strip_extension_quita_solo_la_extension() {
        assert_eq!(strip_extension("atencion.pdf"), "atencion");
        assert_eq!(strip_extension("sin_extension"), "sin_extension");
        assert_eq!(strip_extension("varios.puntos.pdf"), "varios.puntos");
    }
}
