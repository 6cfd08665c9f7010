use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::foundation::error::{WeaveError, WeaveResult};
use crate::spec::model::{Annotation, TextLocation};

/// Rasterizes SVG documents with a font database shared across frames and scenes.
#[derive(Clone)]
pub struct SvgRasterizer {
    fontdb: Arc<usvg::fontdb::Database>,
    font_family: Option<String>,
}

impl std::fmt::Debug for SvgRasterizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvgRasterizer")
            .field("faces", &self.fontdb.len())
            .field("font_family", &self.font_family)
            .finish()
    }
}

impl SvgRasterizer {
    /// Load system fonts plus `font_file`; a `font` that names no file is used as family name.
    pub fn new(font: Option<&str>, font_file: Option<&Path>) -> WeaveResult<Self> {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        let mut family = None;
        if let Some(path) = font_file {
            let before = db.len();
            db.load_font_file(path).map_err(|e| {
                WeaveError::resource(None, format!("load font '{}': {e}", path.display()))
            })?;
            family = db
                .faces()
                .skip(before)
                .find_map(|face| face.families.first().map(|(name, _)| name.clone()));
        } else if let Some(name) = font {
            family = Some(name.to_string());
        }
        tracing::debug!(faces = db.len(), family = ?family, "svg font database ready");
        Ok(Self {
            fontdb: Arc::new(db),
            font_family: family,
        })
    }

    /// Parse and render `svg` scaled to `width x height`; returns straight (non-premultiplied)
    /// RGBA8.
    pub fn rasterize(
        &self,
        svg: &str,
        resources_dir: Option<&Path>,
        width: u32,
        height: u32,
    ) -> WeaveResult<Vec<u8>> {
        let mut opts = usvg::Options {
            resources_dir: resources_dir.map(PathBuf::from),
            fontdb: self.fontdb.clone(),
            ..Default::default()
        };
        if let Some(family) = &self.font_family {
            opts.font_family = family.clone();
        }
        let tree = usvg::Tree::from_str(svg, &opts)
            .map_err(|e| WeaveError::serde(format!("parse svg: {e}")))?;

        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| WeaveError::serde(format!("cannot allocate {width}x{height} pixmap")))?;
        let size = tree.size();
        let xform = resvg::tiny_skia::Transform::from_scale(
            width as f32 / size.width(),
            height as f32 / size.height(),
        );
        resvg::render(&tree, xform, &mut pixmap.as_mut());

        let mut out = Vec::with_capacity(width as usize * height as usize * 4);
        for px in pixmap.pixels() {
            let c = px.demultiply();
            out.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        Ok(out)
    }
}

/// Escape text for use in SVG character data and attribute values.
pub(crate) fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Transparent `width x height` SVG drawing `annotations` in output pixel space.
pub(crate) fn annotation_svg(annotations: &[Annotation], width: u32, height: u32) -> String {
    let (w, h) = (width as f64, height as f64);
    let mut body = String::new();
    let mut arrow_heads = String::new();

    for (i, a) in annotations.iter().enumerate() {
        match a {
            Annotation::Highlight(hl) => {
                let [x, y, rw, rh] = hl.rect;
                body.push_str(&format!(
                    r#"<rect x="{x}" y="{y}" width="{rw}" height="{rh}" fill="{}" fill-opacity="{}"/>"#,
                    xml_escape(&hl.color),
                    hl.opacity.clamp(0.0, 1.0)
                ));
            }
            Annotation::Text(t) => {
                let size = t.fontsize as f64;
                let (cx, cy) = match (t.position, t.location) {
                    (Some([px, py]), _) => (w * px / 100.0, h * py / 100.0),
                    (None, Some(TextLocation::Top)) => (w / 2.0, h * 0.1),
                    (None, Some(TextLocation::Center)) => (w / 2.0, h / 2.0),
                    (None, Some(TextLocation::Bottom) | None) => (w / 2.0, h * 0.9),
                };
                let chars = t.content.chars().count().max(1) as f64;
                let (bw, bh) = (chars * size * 0.6 + size, size * 1.6);
                body.push_str(&format!(
                    r#"<rect x="{}" y="{}" width="{bw}" height="{bh}" fill="{}" fill-opacity="{}"/>"#,
                    cx - bw / 2.0,
                    cy - bh / 2.0,
                    xml_escape(&t.bg_color),
                    t.bg_opacity.clamp(0.0, 1.0)
                ));
                body.push_str(&format!(
                    r#"<text x="{cx}" y="{cy}" font-size="{size}" fill="{}" text-anchor="middle" dominant-baseline="central">{}</text>"#,
                    xml_escape(&t.color),
                    xml_escape(&t.content)
                ));
            }
            Annotation::Arrow(ar) => {
                let [x1, y1] = ar.start;
                let [x2, y2] = ar.end;
                let color = xml_escape(&ar.color);
                arrow_heads.push_str(&format!(
                    r#"<marker id="head{i}" markerWidth="4" markerHeight="4" refX="2" refY="2" orient="auto" markerUnits="strokeWidth"><path d="M0,0 L4,2 L0,4 z" fill="{color}"/></marker>"#
                ));
                body.push_str(&format!(
                    r#"<line x1="{x1}" y1="{y1}" x2="{x2}" y2="{y2}" stroke="{color}" stroke-width="{}" stroke-linecap="round" marker-end="url(#head{i})"/>"#,
                    ar.width
                ));
            }
        }
    }

    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}"><defs>{arrow_heads}</defs>{body}</svg>"#
    )
}
