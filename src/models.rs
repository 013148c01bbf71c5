//! Modelos de dominio (documentos ingeridos y nodos del mapa mental).

use serde::{Deserialize, Serialize};

/// Representa un documento ingerido: el PDF original, sus metadatos
/// extraídos por el LLM y el mapa mental generado.
///
/// Los nombres en el wire (y en ambos backends de persistencia) van en
/// camelCase: `id, filename, title, authors, date, mindmapData, pdfText,
/// createdAt, updatedAt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindmapItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Fecha de publicación en texto libre ("June 2017", "2017-06-12"...).
    #[serde(default)]
    pub date: String,
    /// Raíz del mapa mental.
    #[serde(default)]
    pub mindmap_data: MindmapNode,
    /// Texto completo extraído del PDF.
    #[serde(default)]
    pub pdf_text: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Un nodo del mapa mental. Árbol ordenado de aridad variable; las hojas
/// no llevan la clave `children` en el wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MindmapNode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tooltip: String,
    /// Sección del documento a la que pertenece ("Introducción", "2.1 ...").
    #[serde(default)]
    pub section: String,
    /// Página(s) de origen como texto ("3", "5-7").
    #[serde(default)]
    pub pages: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MindmapNode>,
}

/// Un segmento de la ruta que direcciona un nodo dentro del árbol.
///
/// En el wire llega como string (nombre de campo) o como número (posición
/// en una lista, no necesariamente entero: se trunca al resolver).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(f64),
}

/// Parche aplicado al nodo direccionado: los campos presentes sobrescriben,
/// el resto del nodo queda intacto.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub tooltip: Option<String>,
    pub section: Option<String>,
    pub pages: Option<String>,
    pub children: Option<Vec<MindmapNode>>,
}

impl NodePatch {
    /// Parche que solo reemplaza el tooltip.
    pub fn tooltip(tooltip: impl Into<String>) -> Self {
        Self {
            tooltip: Some(tooltip.into()),
            ..Self::default()
        }
    }

    /// Parche que solo reemplaza la lista de hijos.
    pub fn children(children: Vec<MindmapNode>) -> Self {
        Self {
            children: Some(children),
            ..Self::default()
        }
    }
}
