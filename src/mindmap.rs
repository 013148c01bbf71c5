//! Mutación in-place del mapa mental direccionada por ruta.
//!
//! Una ruta es una secuencia de segmentos campo/índice que identifica un
//! único nodo alcanzable desde la raíz (p.ej. `["children", 1, "children", 0]`).
//! El recorrido alterna entre un nodo (contenedor con claves) y su lista de
//! hijos; al llegar al último segmento se aplica el parche.

use crate::models::{MindmapNode, NodePatch, PathSegment};

/// Posición actual del recorrido: un nodo o una lista de hijos.
enum Cursor<'a> {
    Node(&'a mut MindmapNode),
    List(&'a mut Vec<MindmapNode>),
}

/// Localiza el nodo direccionado por `path` y le aplica `patch`.
///
/// - Un segmento de campo exige estar sobre un nodo y solo `children` es un
///   contenedor direccionable; cualquier otro nombre no resuelve.
/// - Un segmento de índice exige estar sobre una lista; el valor se trunca a
///   entero y debe quedar dentro de rango.
/// - Si el último segmento es un índice, el parche se fusiona en el nodo
///   (los campos no mencionados se conservan). Si es el campo `children`,
///   la lista se reemplaza entera por `patch.children`.
///
/// Devuelve `false` (no aplicado) si la ruta está vacía o no resuelve; en
/// ese caso el árbol queda intacto. No resolver no es un error del servidor:
/// el llamante lo comunica como "ruta no encontrada".
pub fn update_node(root: &mut MindmapNode, path: &[PathSegment], patch: &NodePatch) -> bool {
    if path.is_empty() {
        return false;
    }

    let last = path.len() - 1;
    let mut cursor = Cursor::Node(root);

    for (i, segment) in path.iter().enumerate() {
        let is_last = i == last;
        cursor = match (cursor, segment) {
            (Cursor::Node(node), PathSegment::Field(name)) if name == "children" => {
                if is_last {
                    // Reemplazo directo: el destino es la lista, no un nodo.
                    return match &patch.children {
                        Some(children) => {
                            node.children = children.clone();
                            true
                        }
                        None => false,
                    };
                }
                Cursor::List(&mut node.children)
            }
            (Cursor::List(list), PathSegment::Index(raw)) => {
                let idx = raw.trunc();
                if !idx.is_finite() || idx < 0.0 || idx >= list.len() as f64 {
                    return false;
                }
                let node = &mut list[idx as usize];
                if is_last {
                    merge_node(node, patch);
                    return true;
                }
                Cursor::Node(node)
            }
            // Segmento incompatible con la posición actual.
            _ => return false,
        };
    }

    false
}

/// Devuelve el nodo direccionado por `path`, si la ruta resuelve.
pub fn node_at<'a>(root: &'a MindmapNode, path: &[PathSegment]) -> Option<&'a MindmapNode> {
    if path.is_empty() {
        return None;
    }
    let mut node = root;
    let mut segments = path.iter();
    while let Some(segment) = segments.next() {
        let PathSegment::Field(name) = segment else {
            return None;
        };
        if name != "children" {
            return None;
        }
        let Some(PathSegment::Index(raw)) = segments.next() else {
            return None;
        };
        let idx = raw.trunc();
        if !idx.is_finite() || idx < 0.0 || idx >= node.children.len() as f64 {
            return None;
        }
        node = &node.children[idx as usize];
    }
    Some(node)
}

/// Fusión superficial: cada campo presente en el parche sobrescribe el del
/// nodo, el resto se conserva.
fn merge_node(node: &mut MindmapNode, patch: &NodePatch) {
    if let Some(name) = &patch.name {
        node.name = name.clone();
    }
    if let Some(tooltip) = &patch.tooltip {
        node.tooltip = tooltip.clone();
    }
    if let Some(section) = &patch.section {
        node.section = section.clone();
    }
    if let Some(pages) = &patch.pages {
        node.pages = pages.clone();
    }
    if let Some(children) = &patch.children {
        node.children = children.clone();
    }
}
