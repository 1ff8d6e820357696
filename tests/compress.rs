use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use pdfmerge::{CancellationToken, Document, Error, Object, Result, compress_bytes, recompress};

mod utils;
use utils::{build_document, image_stream, init_logging, textured, to_pdf};

fn jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let mut encoded = vec![];
    JpegEncoder::new_with_quality(&mut encoded, quality)
        .encode(&textured(width, height, 3), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    encoded
}

#[test]
fn raw_images_shrink() -> Result<()> {
    init_logging();
    let rgb = image_stream(128, 128, "DeviceRGB", textured(128, 128, 3));
    let cmyk = image_stream(96, 96, "DeviceCMYK", textured(96, 96, 4));
    let input = to_pdf(&build_document("photos", 4, vec![rgb, cmyk]));

    let output = compress_bytes(&input, 50, &CancellationToken::new())?;
    let result = output.result;
    assert_eq!(result.size_before, input.len());
    assert_eq!(result.size_after, output.bytes.len());
    assert!(result.size_after < result.size_before);
    let expected = (1.0 - result.size_after as f64 / result.size_before as f64) * 100.0;
    assert!((result.reduction_percent - expected).abs() < 0.01);

    let doc = Document::load_mem(&output.bytes)?;
    assert_eq!(doc.get_pages().len(), 4);
    for id in doc.unique_image_ids() {
        let image = doc.image_object(id)?;
        assert_eq!(image.filters, vec!["DCTDecode".to_string()]);
        assert!(image.color_space.components() <= Some(3));
        let stream = doc.get_object(id)?.as_stream()?;
        let decoded = image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).unwrap();
        assert!(decoded.color().channel_count() <= 3);
    }
    Ok(())
}

#[test]
fn maximum_quality_does_not_grow_jpegs() -> Result<()> {
    let mut photo = image_stream(128, 128, "DeviceRGB", jpeg(128, 128, 75));
    photo.dict.set("Filter", "DCTDecode");
    let input = to_pdf(&build_document("photo", 2, vec![photo]));

    let output = compress_bytes(&input, 100, &CancellationToken::new())?;
    assert!(output.result.size_after as f64 <= output.result.size_before as f64 * 1.01);
    Ok(())
}

#[test]
fn lower_quality_gives_smaller_files() -> Result<()> {
    let rgb = image_stream(128, 128, "DeviceRGB", textured(128, 128, 3));
    let input = to_pdf(&build_document("photo", 1, vec![rgb]));

    let sizes = [10, 40, 70, 95]
        .into_iter()
        .map(|quality| compress_bytes(&input, quality, &CancellationToken::new()).map(|out| out.bytes.len()))
        .collect::<Result<Vec<usize>>>()?;
    assert!(sizes.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", sizes);
    Ok(())
}

#[test]
fn lowest_quality_is_accepted() -> Result<()> {
    let rgb = image_stream(96, 96, "DeviceRGB", textured(96, 96, 3));
    let input = to_pdf(&build_document("a", 2, vec![rgb]));

    let output = compress_bytes(&input, 1, &CancellationToken::new())?;
    assert!(output.result.size_after < output.result.size_before);
    let doc = Document::load_mem(&output.bytes)?;
    assert_eq!(doc.get_pages().len(), 2);
    Ok(())
}

#[test]
fn invalid_quality_is_rejected() {
    let input = to_pdf(&build_document("a", 1, vec![]));
    for quality in [0, 101, 255] {
        let err = compress_bytes(&input, quality, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}

#[test]
fn cancelled_compression_yields_nothing() {
    let rgb = image_stream(64, 64, "DeviceRGB", textured(64, 64, 3));
    let input = to_pdf(&build_document("a", 2, vec![rgb]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = compress_bytes(&input, 50, &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn undecodable_image_aborts_and_keeps_the_input() -> Result<()> {
    let rgb = image_stream(64, 64, "DeviceRGB", textured(64, 64, 3));
    let mut jbig2 = image_stream(64, 64, "DeviceGray", vec![0; 64]);
    jbig2.dict.set("Filter", "JBIG2Decode");
    let doc = build_document("a", 2, vec![rgb, jbig2]);

    let err = recompress(&doc, 50).unwrap_err();
    assert!(matches!(err, Error::ImageDecode { .. }));

    let bytes = to_pdf(&doc);
    assert!(matches!(
        compress_bytes(&bytes, 50, &CancellationToken::new()).unwrap_err(),
        Error::ImageDecode { .. }
    ));
    Ok(())
}

#[test]
fn recompress_leaves_its_input_alone() -> Result<()> {
    let rgb = image_stream(64, 64, "DeviceRGB", textured(64, 64, 3));
    let doc = build_document("a", 1, vec![rgb]);
    let before = doc.objects.clone();

    let smaller = recompress(&doc, 30)?;
    assert_eq!(doc.objects, before);

    let id = smaller.unique_image_ids()[0];
    let stream = smaller.get_object(id)?.as_stream()?;
    assert_eq!(stream.dict.get(b"Filter")?, &Object::from("DCTDecode"));
    assert_eq!(stream.dict.get(b"Length")?, &Object::Integer(stream.content.len() as i64));
    Ok(())
}
