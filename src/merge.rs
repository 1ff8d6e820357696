//! Concatenate documents into one, in a caller supplied order.
//!
//! Every source keeps its own objects, shifted into a disjoint id range.
//! The merged document gets a fresh catalog (`1 0 R`) and a single flat
//! `Pages` node (`2 0 R`) whose kids are the pages of each source in turn.
//! Source catalogs and intermediate page-tree nodes are dropped; attributes
//! the pages inherited from them are copied onto the pages first.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};

use crate::document::INHERITABLE_PAGE_KEYS;
use crate::error::MergeError;
use crate::xref::Xref;
use crate::{Document, Object, ObjectId, Result};

const CATALOG_ID: ObjectId = (1, 0);
const PAGES_ID: ObjectId = (2, 0);
/// Ids reserved for the catalog and the page-tree root of the merged document.
const RESERVED_IDS: u32 = 2;

/// Merge `documents`, taking them in the sequence given by `order`.
///
/// `order` holds indices into `documents`; a document may be named more than
/// once. Fails without producing output if any selected source is unusable.
pub fn merge(documents: Vec<Document>, order: &[usize]) -> Result<Document> {
    if documents.is_empty() || order.is_empty() {
        return Err(MergeError::NoDocuments.into());
    }
    if let Some(unknown) = order.iter().find(|&&index| index >= documents.len()) {
        return Err(MergeError::UnknownSource(unknown.to_string()).into());
    }

    let mut slots: Vec<Option<Document>> = documents.into_iter().map(Some).collect();
    let mut merged = Document::new();
    let mut kids = vec![];
    let mut offset = RESERVED_IDS;

    for (position, &index) in order.iter().enumerate() {
        let used_again = order[position + 1..].contains(&index);
        let source = if used_again {
            slots[index].clone()
        } else {
            slots[index].take()
        }
        .ok_or(MergeError::UnknownSource(index.to_string()))?;

        if version_key(&source.version) > version_key(&merged.version) {
            merged.version.clone_from(&source.version);
        }

        // objects inserted directly can sit above `max_id`
        let source_max_id = source
            .objects
            .keys()
            .next_back()
            .map_or(0, |&(number, _)| number)
            .max(source.max_id);
        let (objects, pages) = splice_source(source, position, offset)?;
        info!("merging source {} with {} pages", index, pages.len());
        debug!("source {} shifted by {}", index, offset);

        merged.objects.extend(objects);
        kids.extend(pages.into_iter().map(Object::Reference));
        offset = offset
            .checked_add(source_max_id)
            .ok_or(MergeError::IdOverflow { source_index: position })?;
    }

    let count = kids.len() as i64;
    merged.objects.insert(
        PAGES_ID,
        dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => count }.into(),
    );
    merged
        .objects
        .insert(CATALOG_ID, dictionary! { "Type" => "Catalog", "Pages" => PAGES_ID }.into());
    merged.trailer = dictionary! { "Root" => CATALOG_ID };
    merged.reference_table = Xref::new(0);
    merged.max_id = offset;

    info!("merged {} sources into {} pages", order.len(), count);
    Ok(merged)
}

/// Merge named sources, ordering them by name.
pub fn merge_named(sources: Vec<(String, Document)>, order: &[&str]) -> Result<Document> {
    let mut names = vec![];
    let mut documents = vec![];
    for (name, document) in sources {
        names.push(name);
        documents.push(document);
    }

    let indices = order
        .iter()
        .map(|name| {
            names
                .iter()
                .position(|candidate| candidate == name)
                .ok_or_else(|| MergeError::UnknownSource(name.to_string()).into())
        })
        .collect::<Result<Vec<usize>>>()?;

    merge(documents, &indices)
}

/// Compare versions numerically, so that `1.10` sorts after `1.9`.
fn version_key(version: &str) -> (u32, u32) {
    let mut parts = version.split('.').map(|part| part.trim().parse().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

/// Prepare one source: flatten its page attributes, drop its page tree and
/// shift every id by `offset`. Returns the shifted objects and page ids.
fn splice_source(
    mut source: Document, source_index: usize, offset: u32,
) -> Result<(BTreeMap<ObjectId, Object>, Vec<ObjectId>)> {
    let catalog_id = source
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .ok()
        .filter(|id| source.get_dictionary(*id).is_ok())
        .ok_or(MergeError::MissingCatalog { source_index })?;
    let root = source
        .page_tree_root()
        .map_err(|_| MergeError::MissingPageTree { source_index })?;
    let root_dict = source
        .get_dictionary(root)
        .map_err(|err| MergeError::InvalidPageTree {
            source_index,
            reason: err.to_string(),
        })?;
    if !root_dict.has(b"Kids") {
        return Err(MergeError::InvalidPageTree {
            source_index,
            reason: "root node has no Kids".to_string(),
        }
        .into());
    }

    let pages: Vec<ObjectId> = source.page_iter().collect();
    let page_set: HashSet<ObjectId> = pages.iter().copied().collect();
    let tree_nodes = intermediate_nodes(&source, root);

    for &page in &pages {
        let inherited: Vec<(&[u8], Object)> = INHERITABLE_PAGE_KEYS
            .iter()
            .filter(|key| source.get_dictionary(page).is_ok_and(|dict| !dict.has(key)))
            .filter_map(|&key| source.get_page_inherited(page, key).map(|value| (key, value.clone())))
            .collect();
        let dict = source.get_dictionary_mut(page).map_err(|err| MergeError::InvalidPageTree {
            source_index,
            reason: err.to_string(),
        })?;
        for (key, value) in inherited {
            dict.set(key, value);
        }
    }

    source.objects.remove(&catalog_id);
    for node in tree_nodes {
        source.objects.remove(&node);
    }

    let shift = |id: ObjectId| -> Option<ObjectId> { id.0.checked_add(offset).map(|number| (number, id.1)) };
    let present: HashSet<ObjectId> = source.objects.keys().copied().collect();
    let mut rewrite = |id: ObjectId| match shift(id) {
        Some(new_id) if present.contains(&id) => Object::Reference(new_id),
        _ => Object::Null,
    };

    let mut objects = BTreeMap::new();
    for (id, mut object) in source.objects {
        object.map_references(&mut rewrite);
        if page_set.contains(&id) {
            if let Ok(dict) = object.as_dict_mut() {
                dict.set("Parent", PAGES_ID);
            }
        }
        let new_id = shift(id).ok_or(MergeError::IdOverflow { source_index })?;
        objects.insert(new_id, object);
    }

    let pages = pages
        .into_iter()
        .map(|page| shift(page).ok_or(MergeError::IdOverflow { source_index }.into()))
        .collect::<Result<Vec<ObjectId>>>()?;
    Ok((objects, pages))
}

/// Non-leaf nodes of the page tree below (and including) `root`.
fn intermediate_nodes(doc: &Document, root: ObjectId) -> Vec<ObjectId> {
    let mut nodes = vec![];
    let mut seen = HashSet::new();
    let mut pending = vec![root];

    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Ok(dict) = doc.get_dictionary(id) else {
            continue;
        };
        if let Ok(kids) = dict.get(b"Kids").and_then(Object::as_array) {
            nodes.push(id);
            pending.extend(kids.iter().filter_map(|kid| kid.as_reference().ok()));
        }
    }

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Stream};

    /// A document whose pages each carry a content stream naming them.
    fn document(label: &str, page_count: usize) -> Document {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = vec![];
        for page in 0..page_count {
            let content = format!("BT ({} {}) Tj ET", label, page).into_bytes();
            let contents = doc.add_object(Stream::new(dictionary! {}, content));
            kids.push(doc.add_object(dictionary! { "Type" => "Page", "Parent" => pages_id, "Contents" => contents }).into());
        }
        doc.objects.insert(
            pages_id,
            dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }
            .into(),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        doc
    }

    fn page_labels(doc: &Document) -> Vec<String> {
        doc.page_iter()
            .map(|page| {
                let contents = doc.get_dictionary(page).unwrap().get(b"Contents").unwrap();
                let stream = doc.dereference(contents).unwrap().1.as_stream().unwrap();
                String::from_utf8(stream.content.clone()).unwrap()
            })
            .collect()
    }

    #[test]
    fn pages_follow_the_order() {
        let merged = merge(vec![document("a", 2), document("b", 1)], &[1, 0]).unwrap();
        assert_eq!(merged.get_pages().len(), 3);
        assert_eq!(
            page_labels(&merged),
            vec!["BT (b 0) Tj ET", "BT (a 0) Tj ET", "BT (a 1) Tj ET"]
        );
    }

    #[test]
    fn ids_are_disjoint_and_pages_reparented() {
        let first = document("a", 2);
        let first_len = first.objects.len();
        let merged = merge(vec![first, document("b", 3)], &[0, 1]).unwrap();
        // both catalogs and page-tree roots replaced by one of each
        assert_eq!(merged.objects.len(), first_len - 2 + 8 - 2 + 2);
        for page in merged.page_iter() {
            let dict = merged.get_dictionary(page).unwrap();
            assert_eq!(dict.get(b"Parent").unwrap(), &Object::Reference(PAGES_ID));
            assert!(dict.has(b"MediaBox"));
        }
        assert!(merged.max_id >= *merged.objects.keys().next_back().map(|(id, _)| id).unwrap());
    }

    #[test]
    fn ids_above_cached_max_id() {
        // objects inserted directly, bypassing `add_object`
        let unnumbered = |label: &str| {
            let mut doc = Document::with_version("1.4");
            let content = format!("BT ({} 0) Tj ET", label).into_bytes();
            doc.objects.insert((10, 0), Stream::new(dictionary! {}, content).into());
            doc.objects.insert((11, 0), dictionary! { "Type" => "Page", "Parent" => (12, 0), "Contents" => (10, 0) }.into());
            doc.objects.insert(
                (12, 0),
                dictionary! { "Type" => "Pages", "Kids" => vec![Object::Reference((11, 0))], "Count" => 1 }.into(),
            );
            doc.objects.insert((13, 0), dictionary! { "Type" => "Catalog", "Pages" => (12, 0) }.into());
            doc.trailer.set("Root", (13, 0));
            assert_eq!(doc.max_id, 0);
            doc
        };

        let merged = merge(vec![unnumbered("a"), unnumbered("b")], &[0, 1]).unwrap();
        assert_eq!(page_labels(&merged), vec!["BT (a 0) Tj ET", "BT (b 0) Tj ET"]);
        assert_eq!(merged.objects.len(), 2 + 2 + 2);
        assert!(merged.max_id >= *merged.objects.keys().next_back().map(|(id, _)| id).unwrap());
    }

    #[test]
    fn same_source_twice() {
        let merged = merge(vec![document("a", 1)], &[0, 0]).unwrap();
        assert_eq!(page_labels(&merged), vec!["BT (a 0) Tj ET", "BT (a 0) Tj ET"]);
        let pages: Vec<_> = merged.page_iter().collect();
        assert_ne!(pages[0], pages[1]);
    }

    #[test]
    fn highest_version_wins() {
        let mut newer = document("b", 1);
        newer.version = "1.10".into();
        let merged = merge(vec![document("a", 1), newer], &[0, 1]).unwrap();
        assert_eq!(merged.version, "1.10");
    }

    #[test]
    fn missing_page_tree_aborts() {
        let mut broken = document("b", 1);
        let catalog = broken.trailer.get(b"Root").unwrap().as_reference().unwrap();
        broken.get_dictionary_mut(catalog).unwrap().remove(b"Pages");
        let err = merge(vec![document("a", 1), broken], &[0, 1]).unwrap_err();
        assert!(matches!(err, Error::Merge(MergeError::MissingPageTree { source_index: 1 })));
    }

    #[test]
    fn bad_orders() {
        assert!(matches!(
            merge(vec![], &[]).unwrap_err(),
            Error::Merge(MergeError::NoDocuments)
        ));
        assert!(matches!(
            merge(vec![document("a", 1)], &[3]).unwrap_err(),
            Error::Merge(MergeError::UnknownSource(_))
        ));
        let named = vec![("a.pdf".to_string(), document("a", 1))];
        assert!(matches!(
            merge_named(named, &["b.pdf"]).unwrap_err(),
            Error::Merge(MergeError::UnknownSource(name)) if name == "b.pdf"
        ));
    }

    #[test]
    fn named_order() {
        let sources = vec![
            ("first.pdf".to_string(), document("a", 1)),
            ("second.pdf".to_string(), document("b", 1)),
        ];
        let merged = merge_named(sources, &["second.pdf", "first.pdf"]).unwrap();
        assert_eq!(page_labels(&merged), vec!["BT (b 0) Tj ET", "BT (a 0) Tj ET"]);
    }
}
