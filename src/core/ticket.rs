use chrono::{DateTime, Utc};
use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::{DynamicImage, Rgb, RgbImage};
use printpdf::{BuiltinFont, Color, Image, ImageTransform, Mm, PdfDocument};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    util::{escape_xml, format_long_date},
};

use super::{attendee::AttendeeRecord, Download};

pub const TICKET_PREFIX: &str = "TG-2025";
pub const DOCUMENT_TITLE: &str = "Tea Gathering - Event Ticket";

const NORMAL: [u8; 3] = [0x25, 0x22, 0x65];
const DARK: [u8; 3] = [0x1c, 0x1a, 0x4c];
const LIGHT_ACTIVE: [u8; 3] = [0xbb, 0xba, 0xcf];
const WHITE: [u8; 3] = [0xff, 0xff, 0xff];
const FOOTER_GREY: [u8; 3] = [70, 70, 70];

const CARD_WIDTH: u32 = 640;
const CARD_HEIGHT: u32 = 320;
const HEADER_HEIGHT: u32 = 72;
const BORDER: u32 = 2;
const QR_ORIGIN: (u32, u32) = (24, 100);
const QR_SIZE: u32 = 196;
/// Light modules around the code, in modules.
const QR_QUIET_ZONE: usize = 2;

const A4_WIDTH_MM: f32 = 210.0;
const A4_HEIGHT_MM: f32 = 297.0;
const IMAGE_LEFT_MM: f32 = 10.0;
const IMAGE_TOP_MM: f32 = 25.0;
const IMAGE_WIDTH_MM: f32 = 190.0;
const MM_PER_PT: f32 = 25.4 / 72.0;

/// Human ticket number: the prefix plus the first 8 characters of the id, uppercased.
pub fn ticket_number(id: &str) -> String {
    let short_id: String = id.chars().take(8).collect();
    format!("{}-{}", TICKET_PREFIX, short_id.to_uppercase())
}

/// The structured content of the ticket QR code.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    pub id: String,
    pub name: String,
    pub student_id: String,
    pub batch: String,
    pub ticket_number: String,
}

impl TicketPayload {
    pub fn from_record(record: &AttendeeRecord) -> Self {
        TicketPayload {
            id: record.id.clone(),
            name: record.full_name.clone(),
            student_id: record.student_id.clone(),
            batch: record.batch.clone(),
            ticket_number: ticket_number(&record.id),
        }
    }

    /// Compact json embedded in the QR code.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Dark/light modules of a QR code, row major.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct QrMatrix {
    pub width: usize,
    pub modules: Vec<bool>,
}

impl QrMatrix {
    pub fn encode(data: &str) -> Result<Self> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::H)?;
        Ok(QrMatrix {
            width: code.width(),
            modules: code
                .to_colors()
                .into_iter()
                .map(|c| c == qrcode::Color::Dark)
                .collect(),
        })
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.width && self.modules[y * self.width + x]
    }

    fn span(&self) -> usize {
        self.width + 2 * QR_QUIET_ZONE
    }

    /// Module under a point of the QR square, given in square-relative layout units.
    fn is_dark_at(&self, fx: f32, fy: f32) -> bool {
        let module = QR_SIZE as f32 / self.span() as f32;
        let mx = (fx / module) as usize;
        let my = (fy / module) as usize;
        mx >= QR_QUIET_ZONE
            && my >= QR_QUIET_ZONE
            && self.is_dark(mx - QR_QUIET_ZONE, my - QR_QUIET_ZONE)
    }
}

/// A line of text on the ticket. `y` is the baseline.
#[derive(PartialEq, Debug, Clone)]
pub struct TextLine {
    pub x: u32,
    pub y: u32,
    pub size: u32,
    pub bold: bool,
    pub color: [u8; 3],
    pub text: String,
}

/// Laid-out ticket, in layout units (CSS pixels).
#[derive(PartialEq, Debug, Clone)]
pub struct TicketVisual {
    pub width: u32,
    pub height: u32,
    pub student_id: String,
    pub ticket_number: String,
    pub qr: QrMatrix,
    pub texts: Vec<TextLine>,
}

/// Lay out the ticket for one record with the QR code of its payload.
pub fn render_ticket_visual(record: &AttendeeRecord, payload: &TicketPayload) -> Result<TicketVisual> {
    let qr = QrMatrix::encode(&payload.encode()?)?;

    let mut texts = vec![
        TextLine {
            x: 24,
            y: 46,
            size: 26,
            bold: true,
            color: WHITE,
            text: "Tea Gathering".to_owned(),
        },
        TextLine {
            x: 400,
            y: 44,
            size: 16,
            bold: true,
            color: WHITE,
            text: payload.ticket_number.clone(),
        },
    ];

    let details = [
        ("Name", &record.full_name),
        ("Batch", &record.batch),
        ("Student ID", &record.student_id),
        ("Contact", &record.contact_number),
        ("Email", &record.email),
    ];
    for (i, (label, value)) in details.iter().enumerate() {
        let y = 124 + 38 * i as u32;
        texts.push(TextLine {
            x: 244,
            y,
            size: 12,
            bold: false,
            color: NORMAL,
            text: label.to_uppercase(),
        });
        texts.push(TextLine {
            x: 372,
            y,
            size: 16,
            bold: true,
            color: DARK,
            text: value.to_string(),
        });
    }

    Ok(TicketVisual {
        width: CARD_WIDTH,
        height: CARD_HEIGHT,
        student_id: record.student_id.clone(),
        ticket_number: payload.ticket_number.clone(),
        qr,
        texts,
    })
}

fn hex(color: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

impl TicketVisual {
    /// Human-viewable svg document of the ticket.
    pub fn to_svg(&self) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        svg.push_str(&format!(
            r#"<rect x="1" y="1" width="{}" height="{}" fill="{}" stroke="{}" stroke-width="{}"/>"#,
            self.width - BORDER,
            self.height - BORDER,
            hex(WHITE),
            hex(LIGHT_ACTIVE),
            BORDER
        ));
        svg.push_str(&format!(
            r#"<rect x="0" y="0" width="{}" height="{}" fill="{}"/>"#,
            self.width,
            HEADER_HEIGHT,
            hex(NORMAL)
        ));

        let module = QR_SIZE as f32 / self.qr.span() as f32;
        svg.push_str(&format!(r#"<g fill="{}">"#, hex(DARK)));
        for y in 0..self.qr.width {
            for x in 0..self.qr.width {
                if self.qr.is_dark(x, y) {
                    svg.push_str(&format!(
                        r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}"/>"#,
                        QR_ORIGIN.0 as f32 + (x + QR_QUIET_ZONE) as f32 * module,
                        QR_ORIGIN.1 as f32 + (y + QR_QUIET_ZONE) as f32 * module,
                        module,
                        module
                    ));
                }
            }
        }
        svg.push_str("</g>");

        for line in &self.texts {
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" font-family="Helvetica, Arial, sans-serif" font-size="{}" font-weight="{}" fill="{}">{}</text>"#,
                line.x,
                line.y,
                line.size,
                if line.bold { "bold" } else { "normal" },
                hex(line.color),
                escape_xml(&line.text)
            ));
        }

        svg.push_str("</svg>");
        svg
    }
}

/// Rasterise the ticket at `pixel_ratio` pixels per layout unit.
///
/// Text is drawn with 8x8 bitmap glyphs scaled to each line's size, shrunk
/// when a line would run past the card's right edge.
pub fn rasterize(visual: &TicketVisual, pixel_ratio: u32) -> RgbImage {
    let ratio = pixel_ratio.max(1);
    let (qx, qy) = QR_ORIGIN;

    let mut raster = RgbImage::from_fn(visual.width * ratio, visual.height * ratio, |x, y| {
        let fx = x as f32 / ratio as f32;
        let fy = y as f32 / ratio as f32;
        let (lx, ly) = (x / ratio, y / ratio);

        let color = if lx < BORDER
            || ly < BORDER
            || lx >= visual.width - BORDER
            || ly >= visual.height - BORDER
        {
            LIGHT_ACTIVE
        } else if ly < HEADER_HEIGHT {
            NORMAL
        } else if (qx..qx + QR_SIZE).contains(&lx) && (qy..qy + QR_SIZE).contains(&ly) {
            if visual.qr.is_dark_at(fx - qx as f32, fy - qy as f32) {
                DARK
            } else {
                WHITE
            }
        } else {
            WHITE
        };
        Rgb(color)
    });

    let right_edge = visual.width.saturating_sub(BORDER + TEXT_MARGIN) as f32;
    for line in &visual.texts {
        draw_text(&mut raster, line, ratio as f32, right_edge);
    }
    raster
}

/// Space kept between text and the card frame.
const TEXT_MARGIN: u32 = 8;

fn glyph(c: char) -> [u8; 8] {
    BASIC_FONTS
        .get(c)
        .or_else(|| LATIN_FONTS.get(c))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

fn draw_text(raster: &mut RgbImage, line: &TextLine, ratio: f32, right_edge: f32) {
    let chars = line.text.chars().count();
    if chars == 0 {
        return;
    }

    // Layout units per glyph dot; a glyph is 8 dots square with its baseline at row 6
    let available = (right_edge - line.x as f32).max(0.0);
    let dot = (line.size as f32 / 8.0).min(available / (8.0 * chars as f32));
    if dot <= 0.0 {
        return;
    }
    let top = line.y as f32 - 6.0 * dot;

    let (width, height) = raster.dimensions();
    let to_px = |v: f32| ((v * ratio).round().max(0.0) as u32);
    let max_x = to_px(right_edge).min(width);

    for (i, c) in line.text.chars().enumerate() {
        let left = line.x as f32 + i as f32 * 8.0 * dot;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..8u32 {
                if *bits & (1u8 << col) == 0 {
                    continue;
                }
                let x0 = to_px(left + col as f32 * dot);
                let y0 = to_px(top + row as f32 * dot);
                let x1 = to_px(left + (col + 1) as f32 * dot).max(x0 + 1).min(max_x);
                let y1 = to_px(top + (row + 1) as f32 * dot).max(y0 + 1).min(height);
                for y in y0..y1 {
                    for x in x0..x1 {
                        raster.put_pixel(x, y, Rgb(line.color));
                    }
                }
            }
        }
    }
}

pub fn ticket_file_name(student_id: &str) -> String {
    format!("tea-gathering-ticket-{}.pdf", student_id)
}

fn pdf_color(color: [u8; 3]) -> Color {
    Color::Rgb(printpdf::Rgb::new(
        color[0] as f32 / 255.0,
        color[1] as f32 / 255.0,
        color[2] as f32 / 255.0,
        None,
    ))
}

/// Distance from the top of the page as a pdf y coordinate.
fn from_top(mm: f32) -> Mm {
    Mm(A4_HEIGHT_MM - mm)
}

/// Left edge that centres a Helvetica line on the page.
fn centered_x(text: &str, size_pt: f32) -> Mm {
    // Helvetica averages roughly half an em per glyph
    let width = text.chars().count() as f32 * size_pt * 0.5 * MM_PER_PT;
    Mm(((A4_WIDTH_MM - width) / 2.0).max(0.0))
}

fn pdf_error(e: impl ToString) -> Error {
    Error::artifact("ticket document", e)
}

/// Place the rasterised ticket on a single A4 page with title and footer.
pub fn assemble_ticket_document(
    visual: &TicketVisual,
    raster: &RgbImage,
    generated_at: DateTime<Utc>,
    contact_email: &str,
) -> Result<Download> {
    let (doc, page, layer) =
        PdfDocument::new(DOCUMENT_TITLE, Mm(A4_WIDTH_MM), Mm(A4_HEIGHT_MM), "Ticket");
    let layer = doc.get_page(page).get_layer(layer);
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;

    layer.set_fill_color(pdf_color(NORMAL));
    layer.use_text(
        DOCUMENT_TITLE,
        24.0,
        centered_x(DOCUMENT_TITLE, 24.0),
        from_top(15.0),
        &regular,
    );

    // mm per layout unit
    let scale = IMAGE_WIDTH_MM / visual.width as f32;
    let image_height = visual.height as f32 * scale;
    let dpi = raster.width() as f32 * 25.4 / IMAGE_WIDTH_MM;

    Image::from_dynamic_image(&DynamicImage::ImageRgb8(raster.clone())).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(IMAGE_LEFT_MM)),
            translate_y: Some(from_top(IMAGE_TOP_MM + image_height)),
            dpi: Some(dpi),
            ..Default::default()
        },
    );

    let footer_top = IMAGE_TOP_MM + image_height + 10.0;
    let generated = format!(
        "This ticket was generated on {} for the Tea Gathering event.",
        format_long_date(generated_at)
    );
    let contact = format!("For any inquiries, please contact: {}", contact_email);

    layer.set_fill_color(pdf_color(FOOTER_GREY));
    layer.use_text(
        generated.as_str(),
        10.0,
        centered_x(&generated, 10.0),
        from_top(footer_top),
        &regular,
    );
    layer.use_text(
        contact.as_str(),
        10.0,
        centered_x(&contact, 10.0),
        from_top(footer_top + 5.0),
        &regular,
    );

    let bytes = doc.save_to_bytes().map_err(pdf_error)?;

    Ok(Download {
        file_name: ticket_file_name(&visual.student_id),
        content_type: "application/pdf",
        bytes,
    })
}

/// Build payload, layout, raster and document for one record.
///
/// Read-only and retryable: the record store is never touched.
pub async fn generate_ticket_document(
    record: &AttendeeRecord,
    pixel_ratio: u32,
    contact_email: &str,
) -> Result<Download> {
    let payload = TicketPayload::from_record(record);
    let visual = render_ticket_visual(record, &payload)?;
    let contact_email = contact_email.to_owned();
    let generated_at = Utc::now();

    let document = tokio::task::spawn_blocking(move || {
        let raster = rasterize(&visual, pixel_ratio);
        assemble_ticket_document(&visual, &raster, generated_at, &contact_email)
    })
    .await
    .map_err(|e| Error::artifact("ticket document", e))?;

    match &document {
        Ok(doc) => log::info!("Generated ticket {} for {}", doc.file_name, record.id),
        Err(e) => log::error!("Failed to generate ticket for {}: {}", record.id, e),
    }
    document
}

/// Encode the rasterised ticket as png.
pub async fn generate_ticket_png(record: &AttendeeRecord, pixel_ratio: u32) -> Result<Vec<u8>> {
    let payload = TicketPayload::from_record(record);
    let visual = render_ticket_visual(record, &payload)?;

    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(rasterize(&visual, pixel_ratio))
            .write_to(&mut bytes, image::ImageFormat::Png)?;
        Ok(bytes.into_inner())
    })
    .await
    .map_err(|e| Error::artifact("ticket image", e))?
}
