use std::collections::{BTreeMap, HashSet};

use log::{debug, warn};

use crate::xref::Xref;
use crate::{Document, Object, ObjectId};

/// Sweeps performed by [`Document::prune_objects`] before giving up on further cleanup.
pub const MAX_COLLECTION_PASSES: usize = 4;

impl Document {
    /// Compress PDF stream objects.
    pub fn compress(&mut self) {
        for (id, object) in self.objects.iter_mut() {
            if let Object::Stream(stream) = object {
                if stream.allows_compression {
                    if let Err(err) = stream.compress() {
                        warn!("could not compress stream {} {}: {}", id.0, id.1, err);
                    }
                }
            }
        }
    }

    /// Decompress PDF stream objects.
    pub fn decompress(&mut self) {
        for object in self.objects.values_mut() {
            if let Object::Stream(stream) = object {
                stream.decompress()
            }
        }
    }

    /// Ids of every object reachable from the trailer (`/Root`, `/Info`, ...).
    ///
    /// References that do not resolve are ignored.
    pub fn reachable_objects(&self) -> HashSet<ObjectId> {
        let mut reachable = HashSet::new();
        let mut pending = vec![];
        for (_, value) in self.trailer.iter() {
            value.for_each_reference(&mut |id| pending.push(id));
        }

        while let Some(id) = pending.pop() {
            let Some(object) = self.objects.get(&id) else {
                continue;
            };
            if reachable.insert(id) {
                object.for_each_reference(&mut |id| {
                    if !reachable.contains(&id) {
                        pending.push(id)
                    }
                });
            }
        }

        reachable
    }

    /// Remove objects that cannot be reached from the trailer.
    ///
    /// Sweeping repeats while it still removes objects, for at most
    /// [`MAX_COLLECTION_PASSES`] passes. Returns the removed ids.
    pub fn prune_objects(&mut self) -> Vec<ObjectId> {
        let mut pruned = vec![];

        for pass in 0..MAX_COLLECTION_PASSES {
            let reachable = self.reachable_objects();
            let before = pruned.len();
            self.objects.retain(|id, _| {
                let keep = reachable.contains(id);
                if !keep {
                    pruned.push(*id);
                }
                keep
            });
            debug!("collection pass {} removed {} objects", pass + 1, pruned.len() - before);
            if pruned.len() == before {
                break;
            }
        }

        pruned
    }

    /// Renumber objects contiguously from 1, usually after [`Document::prune_objects`].
    pub fn renumber_objects(&mut self) {
        self.renumber_objects_with(1)
    }

    /// Renumber objects in ascending id order starting at `starting_id`.
    ///
    /// Generations are reset to 0 and every reference in the objects and the
    /// trailer is rewritten. References to missing objects become `null`.
    pub fn renumber_objects_with(&mut self, starting_id: u32) {
        let mut replace = BTreeMap::new();
        let mut new_id = starting_id;
        for &id in self.objects.keys() {
            replace.insert(id, (new_id, 0));
            new_id += 1;
        }

        let mut rewrite = |id: ObjectId| match replace.get(&id) {
            Some(&new_id) => Object::Reference(new_id),
            None => Object::Null,
        };

        let objects = std::mem::take(&mut self.objects);
        self.objects = objects
            .into_iter()
            .map(|(id, mut object)| {
                object.map_references(&mut rewrite);
                (replace[&id], object)
            })
            .collect();
        for (_, value) in self.trailer.iter_mut() {
            value.map_references(&mut rewrite);
        }

        self.max_id = new_id.saturating_sub(1);
        self.reference_table = Xref::new(0);
    }

    /// Delete an object and drop every reference to it from arrays and dictionaries.
    pub fn delete_object(&mut self, id: ObjectId) -> Option<Object> {
        let removed = self.objects.remove(&id)?;
        for object in self.objects.values_mut() {
            strip_references(object, id);
        }
        Some(removed)
    }

    /// Delete streams without content, like empty page content streams.
    pub fn delete_zero_length_streams(&mut self) -> Vec<ObjectId> {
        let empty: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, object)| matches!(object, Object::Stream(stream) if stream.content.is_empty()))
            .map(|(id, _)| *id)
            .collect();

        for &id in &empty {
            self.delete_object(id);
        }
        empty
    }

    /// Prune unreachable objects, then renumber what is left from 1.
    pub fn collect_garbage(&mut self) -> Vec<ObjectId> {
        let pruned = self.prune_objects();
        self.renumber_objects();
        pruned
    }
}

fn strip_references(object: &mut Object, target: ObjectId) {
    match object {
        Object::Array(array) => {
            array.retain(|item| item.as_reference().ok() != Some(target));
            array.iter_mut().for_each(|item| strip_references(item, target));
        }
        Object::Dictionary(dict) => strip_dict_references(dict, target),
        Object::Stream(stream) => strip_dict_references(&mut stream.dict, target),
        _ => {}
    }
}

fn strip_dict_references(dict: &mut crate::Dictionary, target: ObjectId) {
    let keys: Vec<Vec<u8>> = dict
        .iter()
        .filter(|(_, value)| value.as_reference().ok() == Some(target))
        .map(|(key, _)| key.clone())
        .collect();
    for key in keys {
        dict.remove(&key);
    }
    dict.iter_mut().for_each(|(_, value)| strip_references(value, target));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Stream, dictionary};

    fn document_with_garbage() -> Document {
        let mut doc = Document::new();
        let font = doc.add_object(dictionary! { "Type" => "Font" });
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font } },
        });
        let pages = doc.add_object(dictionary! { "Type" => "Pages", "Kids" => vec![page.into()], "Count" => 1 });
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages });
        // an orphaned subset font and an object only it references
        let glyphs = doc.add_object(Stream::new(dictionary! {}, b"glyphs".to_vec()));
        doc.add_object(dictionary! { "Type" => "Font", "FontFile" => glyphs });
        doc.trailer.set("Root", catalog);
        doc
    }

    #[test]
    fn prune_keeps_reachable() {
        let mut doc = document_with_garbage();
        let before = doc.reachable_objects();
        let pruned = doc.prune_objects();
        assert_eq!(pruned, vec![(5, 0), (6, 0)]);
        for id in before {
            assert!(doc.objects.contains_key(&id));
        }
    }

    #[test]
    fn dangling_reference_is_ignored() {
        let mut doc = document_with_garbage();
        doc.get_dictionary_mut((4, 0)).unwrap().set("Outlines", Object::Reference((40, 0)));
        let reachable = doc.reachable_objects();
        assert_eq!(reachable.len(), 4);
    }

    #[test]
    fn renumber_is_contiguous() {
        let mut doc = document_with_garbage();
        doc.delete_object((1, 0));
        doc.collect_garbage();
        let ids: Vec<_> = doc.objects.keys().copied().collect();
        assert_eq!(ids, vec![(1, 0), (2, 0), (3, 0)]);
        assert_eq!(doc.max_id, 3);
        assert_eq!(doc.trailer.get(b"Root").unwrap(), &Object::Reference((3, 0)));
        let pages = doc.catalog().unwrap().get(b"Pages").unwrap();
        assert_eq!(pages, &Object::Reference((2, 0)));
    }

    #[test]
    fn renumber_with_offset() {
        let mut doc = document_with_garbage();
        doc.renumber_objects_with(10);
        assert_eq!(doc.max_id, 15);
        let page = doc.get_dictionary((11, 0)).unwrap();
        let fonts = page.get(b"Resources").unwrap().as_dict().unwrap().get(b"Font").unwrap();
        assert_eq!(fonts.as_dict().unwrap().get(b"F1").unwrap(), &Object::Reference((10, 0)));
    }

    #[test]
    fn zero_length_streams_are_deleted() {
        let mut doc = document_with_garbage();
        let empty = doc.add_object(Stream::new(dictionary! {}, vec![]));
        doc.get_dictionary_mut((2, 0))
            .unwrap()
            .set("Contents", vec![Object::Reference(empty), Object::Reference((5, 0))]);

        assert_eq!(doc.delete_zero_length_streams(), vec![empty]);
        let contents = doc.get_dictionary((2, 0)).unwrap().get(b"Contents").unwrap();
        assert_eq!(contents.as_array().unwrap(), &vec![Object::Reference((5, 0))]);
    }

    #[test]
    fn compress_only_unfiltered_streams() {
        let mut doc = Document::new();
        let plain = doc.add_object(Stream::new(dictionary! {}, b"0 0 m 10 10 l S\n".repeat(20)));
        let fixed = doc.add_object(Stream::new(dictionary! {}, b"abc".repeat(40)).with_compression(false));
        doc.compress();
        let stream = doc.get_object(plain).unwrap().as_stream().unwrap();
        assert_eq!(stream.filters().unwrap(), vec![&b"FlateDecode"[..]]);
        assert!(doc.get_object(fixed).unwrap().as_stream().unwrap().filters().unwrap().is_empty());

        doc.decompress();
        let stream = doc.get_object(plain).unwrap().as_stream().unwrap();
        assert_eq!(stream.content, b"0 0 m 10 10 l S\n".repeat(20));
    }
}
