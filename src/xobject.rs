use std::collections::HashSet;

use log::{debug, warn};

use crate::{Dictionary, Document, Error, Object, ObjectId, Result, Stream};

/// Color space of an image, reduced to what recompression needs to know.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed {
        base: Box<ColorSpace>,
        hival: u8,
        lookup: Vec<u8>,
    },
    IccBased {
        components: u8,
    },
    Other(String),
}

impl ColorSpace {
    /// Interpret a `/ColorSpace` value, following references through `doc`.
    pub fn from_object(object: &Object, doc: &Document) -> ColorSpace {
        let object = match doc.dereference(object) {
            Ok((_, object)) => object,
            Err(err) => return ColorSpace::Other(err.to_string()),
        };

        match object {
            Object::Name(name) => Self::from_family(name),
            Object::Array(array) => {
                let Some(family) = array.first().and_then(|family| family.as_name().ok()) else {
                    return ColorSpace::Other("empty color space array".to_string());
                };
                match family {
                    b"Indexed" | b"I" => Self::indexed(array, doc),
                    b"ICCBased" => {
                        let components = array
                            .get(1)
                            .and_then(|profile| doc.dereference(profile).ok())
                            .and_then(|(_, profile)| profile.as_stream().ok())
                            .and_then(|profile| profile.dict.get(b"N").and_then(Object::as_i64).ok())
                            .and_then(|n| u8::try_from(n).ok());
                        match components {
                            Some(components) => ColorSpace::IccBased { components },
                            None => ColorSpace::Other("ICCBased without N".to_string()),
                        }
                    }
                    // [/CalRGB <<...>>] and friends
                    _ => Self::from_family(family),
                }
            }
            other => ColorSpace::Other(other.enum_variant().to_string()),
        }
    }

    fn from_family(name: &[u8]) -> ColorSpace {
        match name {
            b"DeviceGray" | b"G" | b"CalGray" => ColorSpace::Gray,
            b"DeviceRGB" | b"RGB" | b"CalRGB" => ColorSpace::Rgb,
            b"DeviceCMYK" | b"CMYK" => ColorSpace::Cmyk,
            other => ColorSpace::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    fn indexed(array: &[Object], doc: &Document) -> ColorSpace {
        let base = match array.get(1) {
            Some(base) => Self::from_object(base, doc),
            None => return ColorSpace::Other("Indexed without base".to_string()),
        };
        let hival = array
            .get(2)
            .and_then(|hival| hival.as_i64().ok())
            .map(|hival| hival.clamp(0, 255) as u8)
            .unwrap_or(0);
        let lookup = match array.get(3).map(|lookup| doc.dereference(lookup)) {
            Some(Ok((_, Object::String(bytes, _)))) => bytes.clone(),
            Some(Ok((_, Object::Stream(stream)))) => match stream.decompressed_content() {
                Ok(bytes) => bytes,
                Err(err) => return ColorSpace::Other(format!("Indexed lookup: {}", err)),
            },
            _ => return ColorSpace::Other("Indexed without lookup table".to_string()),
        };

        ColorSpace::Indexed {
            base: Box::new(base),
            hival,
            lookup,
        }
    }

    /// Color components per sample, when known.
    pub fn components(&self) -> Option<usize> {
        match self {
            ColorSpace::Gray => Some(1),
            ColorSpace::Rgb => Some(3),
            ColorSpace::Cmyk => Some(4),
            ColorSpace::Indexed { .. } => Some(1),
            ColorSpace::IccBased { components } => Some(usize::from(*components)),
            ColorSpace::Other(_) => None,
        }
    }
}

/// Descriptor of an image XObject.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageObject {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    pub color_space: ColorSpace,
    pub filters: Vec<String>,
    pub decode: Option<Vec<f32>>,
    pub image_mask: bool,
    pub has_soft_mask: bool,
}

impl ImageObject {
    pub fn from_stream(id: ObjectId, stream: &Stream, doc: &Document) -> Result<ImageObject> {
        let dict = &stream.dict;
        let dimension = |key: &[u8]| -> Result<u32> {
            dict.get_deref(key, doc)
                .and_then(Object::as_i64)
                .ok()
                .and_then(|value| u32::try_from(value).ok())
                .filter(|&value| value > 0)
                .ok_or_else(|| Error::ImageDecode {
                    id,
                    reason: format!("missing or invalid {}", String::from_utf8_lossy(key)),
                })
        };

        let image_mask = dict
            .get(b"ImageMask")
            .and_then(Object::as_bool)
            .unwrap_or(false);
        let bits_per_component = if image_mask {
            1
        } else {
            dict.get_deref(b"BitsPerComponent", doc)
                .and_then(Object::as_i64)
                .ok()
                .and_then(|bpc| u8::try_from(bpc).ok())
                .unwrap_or(8)
        };
        let color_space = match dict.get(b"ColorSpace") {
            Ok(color_space) => ColorSpace::from_object(color_space, doc),
            Err(_) if image_mask => ColorSpace::Gray,
            Err(_) => ColorSpace::Other("no ColorSpace".to_string()),
        };
        let filters = stream
            .filters()
            .map_err(|err| Error::ImageDecode {
                id,
                reason: err.to_string(),
            })?
            .into_iter()
            .map(|filter| String::from_utf8_lossy(filter).into_owned())
            .collect();
        let decode = dict
            .get(b"Decode")
            .and_then(Object::as_array)
            .ok()
            .and_then(|values| values.iter().map(|v| v.as_float().ok()).collect());

        Ok(ImageObject {
            id,
            width: dimension(b"Width")?,
            height: dimension(b"Height")?,
            bits_per_component,
            color_space,
            filters,
            decode,
            image_mask,
            has_soft_mask: dict.has(b"SMask"),
        })
    }
}

/// An image drawn on a page. `page_index` counts from 0 in page order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageImage {
    pub page_index: usize,
    pub image_id: ObjectId,
}

impl Document {
    /// Image XObjects used by each page, in page order.
    ///
    /// Images inside Form XObjects are included. An image shared between
    /// pages is listed once for every page using it.
    pub fn page_images(&self) -> Vec<PageImage> {
        let mut images = vec![];
        for (page_index, page_id) in self.page_iter().enumerate() {
            let mut found = vec![];
            let mut visited = HashSet::new();
            if let Some(resources) = self.get_page_resources(page_id) {
                self.collect_images(resources, &mut visited, &mut found);
            }
            debug!("page {} uses {} images", page_index + 1, found.len());
            images.extend(found.into_iter().map(|image_id| PageImage { page_index, image_id }));
        }
        images
    }

    /// Ids of all page images, each listed once, in order of first use.
    pub fn unique_image_ids(&self) -> Vec<ObjectId> {
        let mut seen = HashSet::new();
        self.page_images()
            .into_iter()
            .map(|image| image.image_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Describe the image stored under `id`.
    pub fn image_object(&self, id: ObjectId) -> Result<ImageObject> {
        let stream = self.get_object(id).and_then(Object::as_stream)?;
        if !stream.is_image() {
            return Err(Error::ImageDecode {
                id,
                reason: "not an image XObject".to_string(),
            });
        }
        ImageObject::from_stream(id, stream, self)
    }

    fn collect_images(&self, resources: &Dictionary, visited: &mut HashSet<ObjectId>, found: &mut Vec<ObjectId>) {
        let Some(xobjects) = resources.get(b"XObject").ok().and_then(|x| self.resolve_dict(x)) else {
            return;
        };

        for (name, entry) in xobjects {
            let Ok(id) = entry.as_reference() else {
                warn!("inline XObject /{} ignored", String::from_utf8_lossy(name));
                continue;
            };
            if !visited.insert(id) {
                continue;
            }
            let Ok(stream) = self.get_object(id).and_then(Object::as_stream) else {
                continue;
            };

            match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                Ok(b"Image") => found.push(id),
                Ok(b"Form") => {
                    if let Some(form_resources) = stream.dict.get(b"Resources").ok().and_then(|r| self.resolve_dict(r)) {
                        self.collect_images(form_resources, visited, found);
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    fn raw_image(doc: &mut Document, color_space: Object) -> ObjectId {
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 1,
                "BitsPerComponent" => 8,
                "ColorSpace" => color_space,
            },
            vec![0; 6],
        ))
    }

    fn form_xobject(content: &[u8], xobjects: Dictionary) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()],
                "Resources" => dictionary! { "XObject" => xobjects },
            },
            content.to_vec(),
        )
    }

    fn document_with_pages(mut doc: Document, page_resources: Vec<Dictionary>) -> Document {
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = page_resources
            .into_iter()
            .map(|resources| {
                doc.add_object(dictionary! { "Type" => "Page", "Parent" => pages_id, "Resources" => resources })
                    .into()
            })
            .collect();
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => count }.into(),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        doc
    }

    #[test]
    fn shared_images_listed_per_page() {
        let mut doc = Document::new();
        let photo = raw_image(&mut doc, "DeviceRGB".into());
        let logo = raw_image(&mut doc, "DeviceGray".into());
        let page_a = dictionary! { "XObject" => dictionary! { "Im1" => photo, "Im2" => logo } };
        let page_b = dictionary! { "XObject" => dictionary! { "Im1" => logo } };
        let merged = document_with_pages(doc, vec![page_a, page_b]);

        let images = merged.page_images();
        assert_eq!(
            images,
            vec![
                PageImage { page_index: 0, image_id: photo },
                PageImage { page_index: 0, image_id: logo },
                PageImage { page_index: 1, image_id: logo },
            ]
        );
        assert_eq!(merged.unique_image_ids(), vec![photo, logo]);
    }

    #[test]
    fn images_nested_in_forms() {
        let mut doc = document_with_pages(Document::new(), vec![]);
        let pages_id = doc.page_tree_root().unwrap();
        let photo = raw_image(&mut doc, "DeviceRGB".into());
        let inner = doc.add_object(form_xobject(b"/Im0 Do", dictionary! { "Im0" => photo }));
        // a form drawing itself must not loop forever
        let outer = doc.new_object_id();
        let outer_form = form_xobject(b"/Fm0 Do /Fm1 Do", dictionary! { "Fm0" => inner, "Fm1" => outer });
        doc.objects.insert(outer, outer_form.into());
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Fm1" => outer } },
        });
        doc.get_dictionary_mut(pages_id).unwrap().set("Kids", vec![Object::Reference(page)]);

        assert_eq!(doc.unique_image_ids(), vec![photo]);
    }

    #[test]
    fn describe_color_spaces() {
        let mut doc = Document::new();
        let profile = doc.add_object(Stream::new(dictionary! { "N" => 4 }, vec![]));
        let icc = raw_image(&mut doc, Object::Array(vec!["ICCBased".into(), profile.into()]));
        let indexed = raw_image(
            &mut doc,
            Object::Array(vec![
                "Indexed".into(),
                "DeviceRGB".into(),
                1.into(),
                Object::String(vec![0, 0, 0, 255, 255, 255], crate::StringFormat::Hexadecimal),
            ]),
        );

        let icc = doc.image_object(icc).unwrap();
        assert_eq!(icc.color_space, ColorSpace::IccBased { components: 4 });
        assert_eq!(icc.color_space.components(), Some(4));

        let indexed = doc.image_object(indexed).unwrap();
        match indexed.color_space {
            ColorSpace::Indexed { base, hival, lookup } => {
                assert_eq!(*base, ColorSpace::Rgb);
                assert_eq!(hival, 1);
                assert_eq!(lookup.len(), 6);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn image_without_width_is_rejected() {
        let mut doc = Document::new();
        let id = doc.add_object(Stream::new(dictionary! { "Subtype" => "Image", "Height" => 4 }, vec![]));
        assert!(matches!(doc.image_object(id), Err(Error::ImageDecode { .. })));
    }
}
