use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::image::{IMAGE_EXTENSIONS, generated_image_file_names};
use super::{RenderError, RenderReport, ensure_dir};
use crate::models::Story;
use crate::storage::sanitize_dir_name;

const STYLESHEET: &str = "\
body { margin: 0; font-family: \"Noto Serif SC\", \"Songti SC\", serif; background: #fdfaf3; color: #333; }
.page { box-sizing: border-box; width: 210mm; min-height: 297mm; margin: 0 auto; padding: 20mm; \
page-break-after: always; break-after: page; }
.cover { display: flex; flex-direction: column; justify-content: center; align-items: center; text-align: center; }
.cover h1 { font-size: 32pt; }
.page h2 { font-size: 16pt; color: #8a6d3b; }
.page img { display: block; max-width: 100%; max-height: 140mm; margin: 0 auto 8mm; }
.placeholder { height: 100mm; margin-bottom: 8mm; border: 2px dashed #c8b88a; display: flex; \
align-items: center; justify-content: center; color: #a0936d; }
.page p { font-size: 14pt; line-height: 1.8; text-indent: 2em; white-space: pre-wrap; }
";

/// Lays the story out as one paginated HTML book next to its images.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentRenderer;

impl DocumentRenderer {
    pub fn new() -> Self {
        Self
    }

    pub async fn render(&self, story: &Story, dir: &Path) -> Result<RenderReport, RenderError> {
        ensure_dir(dir).await?;
        let mut report = RenderReport::default();

        let mut images = Vec::with_capacity(story.parts.len());
        for part in &story.parts {
            let image = find_part_image(dir, part.part_number).await;
            if image.is_none() {
                warn!(part_number = part.part_number, "no image found for part, using placeholder");
                report.skipped.push(part.part_number);
            }
            images.push(image);
        }

        let html = render_html(story, &images);
        let path = dir.join(document_file_name(&story.title));
        tokio::fs::write(&path, html)
            .await
            .map_err(|source| RenderError::Write {
                path: path.clone(),
                source,
            })?;

        info!(title = %story.title, path = %path.display(), "document saved");
        report.produced.push(path);
        Ok(report)
    }
}

pub fn document_file_name(title: &str) -> String {
    format!("{}.html", sanitize_dir_name(title))
}

/// File name (relative to `dir`) of the first existing image for a part.
async fn find_part_image(dir: &Path, part_number: u32) -> Option<String> {
    let candidates = generated_image_file_names(part_number).chain(
        IMAGE_EXTENSIONS
            .iter()
            .map(|extension| format!("part{part_number}.{extension}")),
    );

    for name in candidates {
        let path: PathBuf = dir.join(&name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(name);
        }
    }
    None
}

fn render_html(story: &Story, images: &[Option<String>]) -> String {
    let title = escape_html(&story.title);
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"zh-CN\">\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(html, "<title>{title}</title>");
    let _ = writeln!(html, "<style>\n{STYLESHEET}</style>\n</head>\n<body>");
    let _ = writeln!(
        html,
        "<section class=\"page cover\"><h1>{title}</h1></section>"
    );

    for (part, image) in story.parts.iter().zip(images) {
        html.push_str("<section class=\"page\">\n");
        let _ = writeln!(html, "<h2>第{}段</h2>", part.part_number);
        match image {
            Some(name) => {
                let _ = writeln!(
                    html,
                    "<img src=\"{}\" alt=\"{}\">",
                    escape_html(name),
                    escape_html(&part.image_prompt)
                );
            }
            None => html.push_str("<div class=\"placeholder\">图片暂缺</div>\n"),
        }
        let _ = writeln!(html, "<p>{}</p>", escape_html(&part.content));
        html.push_str("</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
