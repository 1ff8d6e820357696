use std::collections::{BTreeMap, HashSet};

use log::warn;

use crate::xref::Xref;
use crate::{Dictionary, Error, Object, ObjectId, Result};

/// Keys a page inherits from its page-tree ancestors.
pub const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Upper bound on chained references followed by [`Document::dereference`].
const MAX_DEREFERENCE_DEPTH: usize = 128;

/// PDF document
#[derive(Debug, Clone)]
pub struct Document {
    /// The version of the PDF specification to which the file conforms.
    pub version: String,

    /// The binary mark important for PDF A/2,3,4 tells various software tools to classify the file as containing
    /// 8-bit binary that should be preserved during processing
    pub binary_mark: Vec<u8>,

    /// The trailer gives the location of the cross-reference table and of certain special objects.
    pub trailer: Dictionary,

    /// The cross-reference table contains locations of the indirect objects.
    pub reference_table: Xref,

    /// The objects that make up the document contained in the file.
    pub objects: BTreeMap<ObjectId, Object>,

    /// Current maximum object id within the document.
    pub max_id: u32,
}

impl Document {
    /// Create new PDF document.
    pub fn new() -> Document {
        Document {
            version: "1.4".to_string(),
            binary_mark: b"\xBB\xAD\xC0\xDE".to_vec(),
            trailer: Dictionary::new(),
            reference_table: Xref::new(0),
            objects: BTreeMap::new(),
            max_id: 0,
        }
    }

    /// Create a new PDF document with version.
    pub fn with_version<S: Into<String>>(version: S) -> Document {
        let mut document = Self::new();
        document.version = version.into();
        document
    }

    /// Follow references until a direct object is found.
    ///
    /// Returns the id of the last object resolved (if `object` was a reference)
    /// together with the direct object.
    pub fn dereference<'a>(&'a self, mut object: &'a Object) -> Result<(Option<ObjectId>, &'a Object)> {
        let mut id = None;
        let mut depth = 0;

        while let Object::Reference(ref_id) = *object {
            if depth >= MAX_DEREFERENCE_DEPTH {
                return Err(Error::ReferenceCycle(ref_id));
            }
            id = Some(ref_id);
            object = self.get_object(ref_id)?;
            depth += 1;
        }

        Ok((id, object))
    }

    /// Get object by object id.
    pub fn get_object(&self, id: ObjectId) -> Result<&Object> {
        self.objects.get(&id).ok_or(Error::ObjectNotFound(id))
    }

    /// Get mutable reference to object by object id.
    pub fn get_object_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.objects.get_mut(&id).ok_or(Error::ObjectNotFound(id))
    }

    pub fn get_dictionary(&self, id: ObjectId) -> Result<&Dictionary> {
        let object = self.get_object(id)?;
        self.dereference(object).and_then(|(_, object)| object.as_dict())
    }

    pub fn get_dictionary_mut(&mut self, id: ObjectId) -> Result<&mut Dictionary> {
        self.get_object_mut(id).and_then(Object::as_dict_mut)
    }

    /// Resolve `object` to a dictionary, treating a dangling reference as absent.
    pub fn resolve_dict<'a>(&'a self, object: &'a Object) -> Option<&'a Dictionary> {
        self.dereference(object).ok().and_then(|(_, object)| object.as_dict().ok())
    }

    /// Get the document catalog (`/Root` of the trailer).
    pub fn catalog(&self) -> Result<&Dictionary> {
        self.trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .and_then(|id| self.get_dictionary(id))
    }

    /// Id of the root `Pages` node.
    pub fn page_tree_root(&self) -> Result<ObjectId> {
        self.catalog()?.get(b"Pages").and_then(Object::as_reference)
    }

    /// Collect all pages, keyed by their 1-based number.
    pub fn get_pages(&self) -> BTreeMap<u32, ObjectId> {
        self.page_iter().enumerate().map(|(i, id)| (i as u32 + 1, id)).collect()
    }

    /// Iterate page object ids in page-tree order.
    pub fn page_iter(&self) -> PageTreeIter<'_> {
        let stack = match self.page_tree_root() {
            Ok(root) => vec![vec![Object::Reference(root)].into_iter()],
            Err(_) => vec![],
        };
        PageTreeIter {
            doc: self,
            stack,
            visited: HashSet::new(),
        }
    }

    /// Look up `key` on the page or, failing that, on its nearest ancestor that holds it.
    pub fn get_page_inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut seen = HashSet::new();
        let mut current = Some(page_id);

        while let Some(id) = current {
            if !seen.insert(id) {
                warn!("cycle in Parent chain of page {:?}", page_id);
                return None;
            }
            let dict = self.get_dictionary(id).ok()?;
            if let Ok(value) = dict.get(key) {
                return Some(value);
            }
            current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        }

        None
    }

    /// The resource dictionary that applies to a page.
    pub fn get_page_resources(&self, page_id: ObjectId) -> Option<&Dictionary> {
        self.get_page_inherited(page_id, b"Resources")
            .and_then(|resources| self.resolve_dict(resources))
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first walk over the page tree yielding leaf `Page` ids.
///
/// Nodes already visited are skipped, so malformed trees with cycles terminate.
pub struct PageTreeIter<'a> {
    doc: &'a Document,
    stack: Vec<std::vec::IntoIter<Object>>,
    visited: HashSet<ObjectId>,
}

impl Iterator for PageTreeIter<'_> {
    type Item = ObjectId;

    fn next(&mut self) -> Option<ObjectId> {
        while let Some(kids) = self.stack.last_mut() {
            let Some(kid) = kids.next() else {
                self.stack.pop();
                continue;
            };
            let Ok(id) = kid.as_reference() else {
                continue;
            };
            if !self.visited.insert(id) {
                warn!("page tree node {} {} visited twice", id.0, id.1);
                continue;
            }
            let Ok(dict) = self.doc.get_dictionary(id) else {
                continue;
            };

            match dict.get_type() {
                Ok(b"Page") => return Some(id),
                _ => {
                    if let Ok(children) = dict.get(b"Kids").and_then(Object::as_array) {
                        self.stack.push(children.clone().into_iter());
                    } else if !dict.has(b"Kids") && dict.has(b"Contents") {
                        // untyped leaf
                        return Some(id);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    fn two_level_tree() -> Document {
        let mut doc = Document::new();
        let root = doc.new_object_id();
        let inner = doc.new_object_id();
        let page_a = doc.add_object(dictionary! { "Type" => "Page", "Parent" => inner, "Contents" => Object::Null });
        let page_b = doc.add_object(dictionary! { "Type" => "Page", "Parent" => inner });
        let page_c = doc.add_object(dictionary! { "Type" => "Page", "Parent" => root });
        let resources = doc.add_object(dictionary! { "Font" => dictionary! {} });
        doc.objects.insert(
            inner,
            dictionary! {
                "Type" => "Pages",
                "Parent" => root,
                "Kids" => vec![page_a.into(), page_b.into()],
                "Count" => 2,
                "MediaBox" => vec![0.into(), 0.into(), 300.into(), 300.into()],
            }
            .into(),
        );
        doc.objects.insert(
            root,
            dictionary! {
                "Type" => "Pages",
                "Kids" => vec![inner.into(), page_c.into()],
                "Count" => 3,
                "Resources" => resources,
            }
            .into(),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => root });
        doc.trailer.set("Root", catalog);
        doc
    }

    #[test]
    fn pages_in_tree_order() {
        let doc = two_level_tree();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[&1], (3, 0));
        assert_eq!(pages[&2], (4, 0));
        assert_eq!(pages[&3], (5, 0));
    }

    #[test]
    fn page_tree_cycle_terminates() {
        let mut doc = two_level_tree();
        let inner = doc.get_dictionary_mut((2, 0)).unwrap();
        inner.set("Kids", vec![Object::Reference((3, 0)), Object::Reference((1, 0))]);
        let pages: Vec<_> = doc.page_iter().collect();
        assert_eq!(pages, vec![(3, 0), (5, 0)]);
    }

    #[test]
    fn inherited_attributes() {
        let doc = two_level_tree();
        let media_box = doc.get_page_inherited((4, 0), b"MediaBox").unwrap();
        assert_eq!(media_box.as_array().unwrap().len(), 4);
        assert!(doc.get_page_resources((3, 0)).unwrap().has(b"Font"));
        assert!(doc.get_page_inherited((5, 0), b"MediaBox").is_none());
    }

    #[test]
    fn dereference_cycle_is_an_error() {
        let mut doc = Document::new();
        doc.objects.insert((1, 0), Object::Reference((2, 0)));
        doc.objects.insert((2, 0), Object::Reference((1, 0)));
        let start = Object::Reference((1, 0));
        assert!(matches!(doc.dereference(&start), Err(Error::ReferenceCycle(_))));
    }
}
