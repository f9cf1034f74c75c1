//! PDF page access: per-page text and the raster images each page actually draws.

use super::image::encode_png;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document as PdfDocument, Object, ObjectId, Stream};
use std::collections::HashSet;
use thiserror::Error;

/// Nesting limit for Form XObjects drawn inside other forms.
const MAX_FORM_DEPTH: usize = 8;
/// Images above this pixel count are reported instead of decoded.
const MAX_IMAGE_PIXELS: usize = 64 * 1024 * 1024;

/// Errors raised when a PDF cannot be opened at all.
#[derive(Debug, Error)]
pub enum PdfReadError {
    /// The byte stream is not a readable PDF.
    #[error("failed to open PDF: {0}")]
    Open(String),
}

/// Content of a single PDF page. Failures are kept per unit so one bad page or image does
/// not hide the rest of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPage {
    /// 1-based page number.
    pub number: u32,
    /// Extractable text, or the reason it could not be parsed.
    pub text: Result<String, String>,
    /// PNG-encoded images drawn on the page, or the reason each could not be decoded.
    pub images: Vec<Result<Vec<u8>, String>>,
}

/// Splits a PDF into pages.
pub trait PdfReader: Send + Sync {
    /// Read every page of the document in order.
    fn read_pages(&self, bytes: &[u8]) -> Result<Vec<PdfPage>, PdfReadError>;
}

/// Reader backed by `pdf-extract` for text and `lopdf` for image XObjects.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfReader;

impl PdfReader for LopdfReader {
    fn read_pages(&self, bytes: &[u8]) -> Result<Vec<PdfPage>, PdfReadError> {
        let document =
            PdfDocument::load_mem(bytes).map_err(|error| PdfReadError::Open(error.to_string()))?;
        let extracted = extract_page_texts(bytes);

        let pages = document
            .get_pages()
            .into_iter()
            .map(|(number, page_id)| {
                let text = extracted
                    .as_ref()
                    .and_then(|texts| texts.get(number as usize - 1).cloned())
                    .map(Ok)
                    .unwrap_or_else(|| {
                        document
                            .extract_text(&[number])
                            .map_err(|error| error.to_string())
                    });
                PdfPage {
                    number,
                    text,
                    images: page_images(&document, page_id, number),
                }
            })
            .collect();
        Ok(pages)
    }
}

/// Text per page via `pdf-extract`, which handles font encodings better than raw `lopdf`.
/// Returns `None` when it fails so callers fall back to per-page extraction.
fn extract_page_texts(bytes: &[u8]) -> Option<Vec<String>> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(Ok(pages)) => Some(pages),
        Ok(Err(error)) => {
            tracing::debug!(error = %error, "pdf-extract failed; using per-page lopdf text");
            None
        }
        Err(_) => {
            tracing::warn!("pdf-extract panicked; using per-page lopdf text");
            None
        }
    }
}

/// Images painted by the page's content stream, in drawing order, each at most once.
///
/// Resources that are defined in the page's resource dictionary but never drawn are ignored,
/// so a dictionary shared between pages does not leak images across them.
fn page_images(document: &PdfDocument, page_id: ObjectId, number: u32) -> Vec<Result<Vec<u8>, String>> {
    let content = match document.get_and_decode_page_content(page_id) {
        Ok(content) => content,
        Err(error) => {
            tracing::debug!(page = number, error = %error, "Page content could not be decoded");
            return vec![Err(format!("page content could not be decoded: {error}"))];
        }
    };

    let resources = page_resources(document, page_id);
    let mut collector = ImageCollector {
        document,
        seen: HashSet::new(),
        images: Vec::new(),
    };
    collector.walk(&content, &resources, 0);
    collector.images
}

/// Resource dictionaries visible to a page, nearest first: the page's own, then those
/// inherited through its `/Parent` chain.
fn page_resources(document: &PdfDocument, page_id: ObjectId) -> Vec<&Dictionary> {
    let mut resources = Vec::new();
    let mut visited = HashSet::from([page_id]);
    let mut node = document.get_dictionary(page_id).ok();
    while let Some(dictionary) = node {
        if let Ok(found) = dictionary
            .get_deref(b"Resources", document)
            .and_then(Object::as_dict)
        {
            resources.push(found);
        }
        node = match dictionary.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) if visited.insert(parent) => document.get_dictionary(parent).ok(),
            _ => None,
        };
    }
    resources
}

fn find_xobject<'a>(
    document: &'a PdfDocument,
    resources: &[&'a Dictionary],
    name: &[u8],
) -> Option<(Option<ObjectId>, &'a Stream)> {
    resources.iter().find_map(|dictionary| {
        let xobjects = dictionary
            .get_deref(b"XObject", document)
            .and_then(Object::as_dict)
            .ok()?;
        let entry = xobjects.get(name).ok()?;
        let (id, object) = document.dereference(entry).ok()?;
        object.as_stream().ok().map(|stream| (id, stream))
    })
}

struct ImageCollector<'a> {
    document: &'a PdfDocument,
    seen: HashSet<ObjectId>,
    images: Vec<Result<Vec<u8>, String>>,
}

impl<'a> ImageCollector<'a> {
    fn walk(&mut self, content: &Content, resources: &[&'a Dictionary], depth: usize) {
        for operation in &content.operations {
            if operation.operator != "Do" {
                continue;
            }
            let Some(name) = operation.operands.first().and_then(|operand| operand.as_name().ok())
            else {
                continue;
            };
            let Some((id, stream)) = find_xobject(self.document, resources, name) else {
                self.images.push(Err(format!(
                    "XObject /{} is not defined in the page resources",
                    String::from_utf8_lossy(name)
                )));
                continue;
            };
            if let Some(id) = id {
                if !self.seen.insert(id) {
                    continue;
                }
            }
            match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                Ok(subtype) if subtype == b"Image" => {
                    self.images.push(decode_image(self.document, stream));
                }
                Ok(subtype) if subtype == b"Form" && depth < MAX_FORM_DEPTH => {
                    self.walk_form(stream, resources, depth);
                }
                _ => {}
            }
        }
    }

    /// Forms use their own `/Resources` when present and fall back to the caller's.
    fn walk_form(&mut self, form: &'a Stream, resources: &[&'a Dictionary], depth: usize) {
        let content = match form
            .get_plain_content()
            .and_then(|data| Content::decode(&data))
        {
            Ok(content) => content,
            Err(error) => {
                self.images.push(Err(format!(
                    "form XObject content could not be decoded: {error}"
                )));
                return;
            }
        };
        let mut scoped = Vec::with_capacity(resources.len() + 1);
        if let Ok(own) = form
            .dict
            .get_deref(b"Resources", self.document)
            .and_then(Object::as_dict)
        {
            scoped.push(own);
        }
        scoped.extend_from_slice(resources);
        self.walk(&content, &scoped, depth + 1);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed {
        base: Box<ColorSpace>,
        palette: Vec<u8>,
    },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            Self::Gray | Self::Indexed { .. } => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }

    /// Append one pixel of 8-bit `values` in this space as RGB.
    fn push_rgb(&self, values: &[u8], out: &mut Vec<u8>) {
        match self {
            Self::Gray => out.extend_from_slice(&[values[0]; 3]),
            Self::Rgb => out.extend_from_slice(&values[..3]),
            Self::Cmyk => {
                let k = 255 - u16::from(values[3]);
                for &channel in &values[..3] {
                    out.push(((255 - u16::from(channel)) * k / 255) as u8);
                }
            }
            Self::Indexed { .. } => {}
        }
    }
}

fn device_color_space(name: &str) -> Result<ColorSpace, String> {
    match name {
        "DeviceGray" | "CalGray" | "G" => Ok(ColorSpace::Gray),
        "DeviceRGB" | "CalRGB" | "RGB" => Ok(ColorSpace::Rgb),
        "DeviceCMYK" | "CMYK" => Ok(ColorSpace::Cmyk),
        other => Err(format!("unsupported color space {other}")),
    }
}

fn resolve_color_space(document: &PdfDocument, object: &Object) -> Result<ColorSpace, String> {
    let (_, object) = document
        .dereference(object)
        .map_err(|error| format!("color space could not be resolved: {error}"))?;
    let items = match object {
        Object::Name(name) => return device_color_space(&String::from_utf8_lossy(name)),
        Object::Array(items) => items,
        _ => return Err("color space is neither a name nor an array".into()),
    };
    let family = items
        .first()
        .and_then(|item| item.as_name().ok())
        .map(String::from_utf8_lossy)
        .ok_or("color space array has no family name")?;

    match family.as_ref() {
        "ICCBased" => {
            let profile = items.get(1).ok_or("ICCBased color space has no profile")?;
            let (_, profile) = document
                .dereference(profile)
                .map_err(|error| format!("ICC profile could not be resolved: {error}"))?;
            let profile = profile
                .as_stream()
                .map_err(|_| "ICC profile is not a stream".to_string())?;
            match profile.dict.get(b"N").and_then(Object::as_i64) {
                Ok(1) => Ok(ColorSpace::Gray),
                Ok(3) => Ok(ColorSpace::Rgb),
                Ok(4) => Ok(ColorSpace::Cmyk),
                components => match profile.dict.get(b"Alternate") {
                    Ok(alternate) => resolve_color_space(document, alternate),
                    Err(_) => Err(format!(
                        "ICC profile with unsupported component count {components:?}"
                    )),
                },
            }
        }
        "Indexed" | "I" => {
            let base = items.get(1).ok_or("Indexed color space has no base")?;
            let base = resolve_color_space(document, base)?;
            if matches!(base, ColorSpace::Indexed { .. }) {
                return Err("Indexed color space cannot be based on another Indexed space".into());
            }
            let lookup = items.get(3).ok_or("Indexed color space has no lookup table")?;
            let (_, lookup) = document
                .dereference(lookup)
                .map_err(|error| format!("palette could not be resolved: {error}"))?;
            let palette = match lookup {
                Object::String(bytes, _) => bytes.clone(),
                Object::Stream(stream) => stream
                    .get_plain_content()
                    .map_err(|error| format!("palette could not be decoded: {error}"))?,
                _ => return Err("palette is neither a string nor a stream".into()),
            };
            Ok(ColorSpace::Indexed {
                base: Box::new(base),
                palette,
            })
        }
        other => device_color_space(other),
    }
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Result<usize, String> {
    let value = dict
        .get(key)
        .and_then(Object::as_i64)
        .map_err(|_| format!("image has no {}", String::from_utf8_lossy(key)))?;
    match usize::try_from(value) {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(format!(
            "invalid image {} {value}",
            String::from_utf8_lossy(key)
        )),
    }
}

/// Decode an image XObject into PNG bytes.
fn decode_image(document: &PdfDocument, stream: &Stream) -> Result<Vec<u8>, String> {
    let dict = &stream.dict;
    let filters: Vec<String> = stream
        .filters()
        .unwrap_or_default()
        .into_iter()
        .map(|filter| String::from_utf8_lossy(filter).into_owned())
        .collect();

    match filters.last().map(String::as_str) {
        Some("DCTDecode") if filters.len() == 1 => {
            let image = image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
                .map_err(|error| error.to_string())?;
            return encode_png(&image).map_err(|error| error.to_string());
        }
        Some(filter @ ("DCTDecode" | "JPXDecode" | "CCITTFaxDecode" | "JBIG2Decode")) => {
            return Err(format!("unsupported image filter {filter}"));
        }
        _ => {}
    }

    let width = dimension(dict, b"Width")?;
    let height = dimension(dict, b"Height")?;
    if width.saturating_mul(height) > MAX_IMAGE_PIXELS {
        return Err(format!("image of {width}x{height} pixels is too large"));
    }

    let image_mask = dict
        .get(b"ImageMask")
        .and_then(Object::as_bool)
        .unwrap_or(false);
    let (color_space, bits) = if image_mask {
        (ColorSpace::Gray, 1)
    } else {
        let space = dict
            .get(b"ColorSpace")
            .map_err(|_| "image has no color space".to_string())
            .and_then(|object| resolve_color_space(document, object))?;
        let bits = dict
            .get(b"BitsPerComponent")
            .and_then(Object::as_i64)
            .unwrap_or(8);
        (space, bits)
    };
    let bits = match bits {
        1 | 2 | 4 | 8 | 16 => bits as u32,
        other => return Err(format!("unsupported bits per component {other}")),
    };
    let inverted = dict
        .get(b"Decode")
        .and_then(Object::as_array)
        .ok()
        .and_then(|range| Some((range.first()?.as_float().ok()?, range.get(1)?.as_float().ok()?)))
        .is_some_and(|(low, high)| low > high);

    let data = stream
        .get_plain_content()
        .map_err(|error| format!("image stream could not be decompressed: {error}"))?;
    let samples = unpack_samples(&data, width, height, color_space.components(), bits)?;
    let max = (1u32 << bits) - 1;
    let scale = |sample: u16| ((u32::from(sample) * 255 + max / 2) / max) as u8;

    let (width_px, height_px) = (width as u32, height as u32);
    let image = match &color_space {
        ColorSpace::Gray => GrayImage::from_raw(
            width_px,
            height_px,
            samples
                .iter()
                .map(|&sample| {
                    let gray = scale(sample);
                    if inverted { 255 - gray } else { gray }
                })
                .collect(),
        )
        .map(DynamicImage::ImageLuma8),
        ColorSpace::Rgb => RgbImage::from_raw(
            width_px,
            height_px,
            samples.iter().map(|&sample| scale(sample)).collect(),
        )
        .map(DynamicImage::ImageRgb8),
        ColorSpace::Cmyk => {
            let scaled: Vec<u8> = samples.iter().map(|&sample| scale(sample)).collect();
            let mut rgb = Vec::with_capacity(width * height * 3);
            for pixel in scaled.chunks_exact(4) {
                ColorSpace::Cmyk.push_rgb(pixel, &mut rgb);
            }
            RgbImage::from_raw(width_px, height_px, rgb).map(DynamicImage::ImageRgb8)
        }
        ColorSpace::Indexed { base, palette } => {
            let stride = base.components();
            let mut rgb = Vec::with_capacity(width * height * 3);
            for &index in &samples {
                let offset = usize::from(index) * stride;
                let entry = palette
                    .get(offset..offset + stride)
                    .ok_or_else(|| format!("palette has no entry {index}"))?;
                base.push_rgb(entry, &mut rgb);
            }
            RgbImage::from_raw(width_px, height_px, rgb).map(DynamicImage::ImageRgb8)
        }
    }
    .ok_or_else(|| "pixel buffer does not match image dimensions".to_string())?;

    encode_png(&image).map_err(|error| error.to_string())
}

/// Split packed rows into one sample per component. Rows are padded to whole bytes.
fn unpack_samples(
    data: &[u8],
    width: usize,
    height: usize,
    components: usize,
    bits: u32,
) -> Result<Vec<u16>, String> {
    let per_row = width * components;
    let row_bytes = (per_row * bits as usize).div_ceil(8);
    let needed = row_bytes * height;
    if data.len() < needed {
        return Err(format!(
            "image data has {} bytes, expected {needed}",
            data.len()
        ));
    }

    let mut samples = Vec::with_capacity(per_row * height);
    for row in data[..needed].chunks_exact(row_bytes) {
        match bits {
            8 => samples.extend(row.iter().map(|&byte| u16::from(byte))),
            16 => samples.extend(
                row.chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
            ),
            _ => {
                let mask = (1u16 << bits) - 1;
                for index in 0..per_row {
                    let bit = index * bits as usize;
                    let shift = 8 - bits as usize - bit % 8;
                    samples.push((u16::from(row[bit / 8]) >> shift) & mask);
                }
            }
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use lopdf::content::Operation;
    use lopdf::dictionary;

    const PAGE_ONE_TEXT: &str = "Quarterly revenue grew in every region this year.";

    /// Where the resources of a two-page fixture live.
    enum Layout {
        PerPage,
        Shared,
        Inherited,
    }

    fn text_ops(text: &str) -> Vec<u8> {
        Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        }
        .encode()
        .expect("encode text content")
    }

    fn draw_ops(name: &str) -> Vec<u8> {
        Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![200.into(), 0.into(), 0.into(), 200.into(), 72.into(), 400.into()],
                ),
                Operation::new("Do", vec![name.into()]),
                Operation::new("Q", vec![]),
            ],
        }
        .encode()
        .expect("encode draw content")
    }

    fn image_stream(width: i64, height: i64, color_space: Object, bits: i64, data: Vec<u8>) -> Stream {
        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => color_space,
                "BitsPerComponent" => bits,
            },
            data,
        );
        stream.compress().expect("compress image");
        stream
    }

    fn red_rgb_image() -> Stream {
        image_stream(16, 16, "DeviceRGB".into(), 8, [200u8, 30, 30].repeat(256))
    }

    fn save(mut doc: PdfDocument, pages_id: ObjectId, mut pages: Dictionary, kids: Vec<ObjectId>) -> Vec<u8> {
        pages.set("Count", kids.len() as i64);
        pages.set(
            "Kids",
            kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
        );
        pages.set(
            "MediaBox",
            vec![0.into(), 0.into(), 612.into(), 792.into()],
        );
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save pdf");
        bytes
    }

    /// Page 1 shows text only; page 2 draws `/Im1` built by `image`.
    fn two_page_pdf(layout: Layout, make_image: impl FnOnce(&mut PdfDocument) -> Stream) -> Vec<u8> {
        let mut doc = PdfDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let image = make_image(&mut doc);
        let image_id = doc.add_object(image);
        let text_id = doc.add_object(Stream::new(dictionary! {}, text_ops(PAGE_ONE_TEXT)));
        let draw_id = doc.add_object(Stream::new(dictionary! {}, draw_ops("Im1")));
        let full = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Im1" => image_id },
        };

        let mut first = dictionary! { "Type" => "Page", "Parent" => pages_id, "Contents" => text_id };
        let mut second = dictionary! { "Type" => "Page", "Parent" => pages_id, "Contents" => draw_id };
        let mut pages = dictionary! { "Type" => "Pages" };
        match layout {
            Layout::PerPage => {
                first.set("Resources", dictionary! { "Font" => dictionary! { "F1" => font_id } });
                second.set(
                    "Resources",
                    dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
                );
            }
            Layout::Shared => {
                let shared = doc.add_object(full);
                first.set("Resources", shared);
                second.set("Resources", shared);
            }
            Layout::Inherited => pages.set("Resources", full),
        }
        let first = doc.add_object(first);
        let second = doc.add_object(second);
        save(doc, pages_id, pages, vec![first, second])
    }

    /// A one-page PDF whose content draws the XObject named `draw`.
    fn single_page_pdf(draw: &str, xobjects: impl FnOnce(&mut PdfDocument) -> Dictionary) -> Vec<u8> {
        let mut doc = PdfDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let xobjects = xobjects(&mut doc);
        let content_id = doc.add_object(Stream::new(dictionary! {}, draw_ops(draw)));
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => xobjects },
        });
        save(doc, pages_id, dictionary! { "Type" => "Pages" }, vec![page])
    }

    fn decoded(image: &Result<Vec<u8>, String>) -> DynamicImage {
        let png = image.as_ref().expect("image decoded");
        image::load_from_memory(png).expect("valid png")
    }

    fn assert_image_only_on_second_page(bytes: &[u8]) {
        let pages = LopdfReader.read_pages(bytes).expect("readable pdf");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert!(pages[0].text.as_ref().expect("text").contains("Quarterly revenue"));
        assert!(pages[0].images.is_empty(), "page 1 draws no image");
        assert_eq!(pages[1].number, 2);
        assert_eq!(pages[1].images.len(), 1);
        let image = decoded(&pages[1].images[0]);
        assert_eq!(image.dimensions(), (16, 16));
        assert_eq!(image.to_rgb8().get_pixel(3, 3).0, [200, 30, 30]);
    }

    #[test]
    fn garbage_is_not_a_pdf() {
        let error = LopdfReader.read_pages(b"plain text pretending").unwrap_err();
        assert!(matches!(error, PdfReadError::Open(_)));
    }

    #[test]
    fn flate_rgb_image_is_found_on_the_page_that_draws_it() {
        assert_image_only_on_second_page(&two_page_pdf(Layout::PerPage, |_| red_rgb_image()));
    }

    #[test]
    fn shared_resource_dictionary_does_not_leak_images_to_other_pages() {
        assert_image_only_on_second_page(&two_page_pdf(Layout::Shared, |_| red_rgb_image()));
    }

    #[test]
    fn resources_inherited_from_the_page_tree_are_resolved() {
        assert_image_only_on_second_page(&two_page_pdf(Layout::Inherited, |_| red_rgb_image()));
    }

    #[test]
    fn icc_based_image_uses_profile_component_count() {
        let bytes = two_page_pdf(Layout::PerPage, |doc| {
            let profile = doc.add_object(Stream::new(dictionary! { "N" => 3 }, vec![0; 128]));
            image_stream(
                16,
                16,
                Object::Array(vec!["ICCBased".into(), Object::Reference(profile)]),
                8,
                [200u8, 30, 30].repeat(256),
            )
        });
        assert_image_only_on_second_page(&bytes);
    }

    #[test]
    fn indexed_one_bit_image_expands_palette() {
        // Two colours, 8x2 pixels: first row all index 1, second row all index 0.
        let bytes = two_page_pdf(Layout::PerPage, |_| {
            let palette = Object::String(vec![0, 0, 255, 255, 255, 0], lopdf::StringFormat::Hexadecimal);
            image_stream(
                8,
                2,
                Object::Array(vec!["Indexed".into(), "DeviceRGB".into(), 1.into(), palette]),
                1,
                vec![0xff, 0x00],
            )
        });
        let pages = LopdfReader.read_pages(&bytes).expect("readable pdf");
        let image = decoded(&pages[1].images[0]).to_rgb8();
        assert_eq!(image.dimensions(), (8, 2));
        assert_eq!(image.get_pixel(5, 0).0, [255, 255, 0]);
        assert_eq!(image.get_pixel(5, 1).0, [0, 0, 255]);
    }

    #[test]
    fn one_bit_gray_honours_inverted_decode_array() {
        let bytes = two_page_pdf(Layout::PerPage, |_| {
            let mut stream = image_stream(8, 1, "DeviceGray".into(), 1, vec![0b1111_0000]);
            stream.dict.set("Decode", vec![1.into(), 0.into()]);
            stream
        });
        let pages = LopdfReader.read_pages(&bytes).expect("readable pdf");
        let image = decoded(&pages[1].images[0]).to_luma8();
        assert_eq!(image.get_pixel(0, 0).0, [0]);
        assert_eq!(image.get_pixel(7, 0).0, [255]);
    }

    #[test]
    fn cmyk_image_is_converted_to_rgb() {
        let bytes = two_page_pdf(Layout::PerPage, |_| {
            image_stream(2, 2, "DeviceCMYK".into(), 8, [0u8, 255, 255, 0].repeat(4))
        });
        let pages = LopdfReader.read_pages(&bytes).expect("readable pdf");
        let image = decoded(&pages[1].images[0]).to_rgb8();
        assert_eq!(image.get_pixel(1, 1).0, [255, 0, 0]);
    }

    #[test]
    fn images_inside_form_xobjects_are_collected() {
        let bytes = single_page_pdf("Fm1", |doc| {
            let image_id = doc.add_object(red_rgb_image());
            let form_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0.into(), 0.into(), 1.into(), 1.into()],
                    "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
                },
                draw_ops("Im1"),
            ));
            dictionary! { "Fm1" => form_id }
        });
        let pages = LopdfReader.read_pages(&bytes).expect("readable pdf");
        assert_eq!(pages[0].images.len(), 1);
        assert_eq!(decoded(&pages[0].images[0]).dimensions(), (16, 16));
    }

    #[test]
    fn undefined_and_unsupported_images_are_reported_per_image() {
        let bytes = single_page_pdf("Missing", |_| Dictionary::new());
        let pages = LopdfReader.read_pages(&bytes).expect("readable pdf");
        assert_eq!(pages[0].images.len(), 1);
        assert!(pages[0].images[0].as_ref().unwrap_err().contains("Missing"));

        let bytes = single_page_pdf("Im1", |doc| {
            let fax = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 8,
                    "Height" => 8,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 1,
                    "Filter" => "CCITTFaxDecode",
                },
                vec![0; 8],
            );
            dictionary! { "Im1" => doc.add_object(fax) }
        });
        let pages = LopdfReader.read_pages(&bytes).expect("readable pdf");
        assert!(pages[0].images[0].as_ref().unwrap_err().contains("CCITTFaxDecode"));
    }

    #[test]
    fn sixteen_bit_samples_are_scaled_down() {
        let samples = unpack_samples(&[0xff, 0xff, 0x00, 0x00], 2, 1, 1, 16).expect("samples");
        assert_eq!(samples, vec![0xffff, 0]);
        let short = unpack_samples(&[0xff], 4, 2, 1, 4);
        assert!(short.is_err());
    }
}
