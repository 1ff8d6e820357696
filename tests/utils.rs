use pdfmerge::{Document, Object, ObjectId, Stream, dictionary};

/// Route library logs to the test output; `RUST_LOG=debug` shows the details.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Gradients with some texture, `components` samples per pixel.
#[allow(dead_code)]
pub fn textured(width: u32, height: u32, components: u32) -> Vec<u8> {
    let mut samples = vec![];
    for y in 0..height {
        for x in 0..width {
            for c in 0..components {
                let noise = (x * 31 + y * 17 + c * 7) % 13 * 6;
                samples.push(((x * 3 + y * 2 + c * 40 + noise) % 256) as u8);
            }
        }
    }
    samples
}

#[allow(dead_code)]
pub fn image_stream(width: u32, height: u32, color_space: &str, content: Vec<u8>) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "BitsPerComponent" => 8,
            "ColorSpace" => color_space,
        },
        content,
    )
}

/// A document with `page_count` pages. Each page shows its label in the
/// content stream and, when given, draws `images[page % images.len()]`.
#[allow(dead_code)]
pub fn build_document(label: &str, page_count: usize, images: Vec<Stream>) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_ids: Vec<ObjectId> = images.into_iter().map(|image| doc.add_object(image)).collect();

    let mut kids: Vec<Object> = vec![];
    for page in 0..page_count {
        let mut resources = dictionary! {};
        let mut content = format!("BT /F1 12 Tf 72 720 Td ({} {}) Tj ET\n", label, page);
        if !image_ids.is_empty() {
            let image = image_ids[page % image_ids.len()];
            resources.set("XObject", dictionary! { "Im0" => image });
            content.push_str("q 200 0 0 200 72 400 cm /Im0 Do Q\n");
        }
        let contents = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => contents,
            "Resources" => resources,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }
        .into(),
    );
    let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog);
    doc
}

#[allow(dead_code)]
pub fn to_pdf(doc: &Document) -> Vec<u8> {
    doc.to_bytes().unwrap()
}

/// The text label of every page, in page order.
#[allow(dead_code)]
pub fn page_labels(doc: &Document) -> Vec<String> {
    doc.page_iter()
        .map(|page| {
            let contents = doc.get_dictionary(page).unwrap().get(b"Contents").unwrap();
            let stream = doc.dereference(contents).unwrap().1.as_stream().unwrap();
            let text = String::from_utf8(stream.decompressed_content().unwrap()).unwrap();
            let start = text.find('(').unwrap() + 1;
            let end = text.find(')').unwrap();
            text[start..end].to_string()
        })
        .collect()
}
