//! Page rasterisation: the [`Document`] seam and its pdfium implementation.
//!
//! ## Threading
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is
//! CPU-bound and not async-aware. Every render runs on tokio's blocking pool
//! so the async workers driving the other pages never stall.
//!
//! A `Pdfium` binding is neither `Send` nor `Sync`, and a pdfium-render
//! `PdfDocument<'a>` borrows it. Each blocking task therefore binds pdfium
//! and loads the file itself; [`PdfDocument`] only keeps the path, the
//! password and the metadata read at open time.

use crate::error::ExtractError;
use crate::output::DocumentInfo;
use crate::pipeline::encode::{encode_page, PageImage};
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// How to rasterise a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub scale: f32,
    /// Cap on the longest edge, in pixels.
    pub max_pixels: u32,
    pub jpeg_quality: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            scale: 1.5,
            max_pixels: 2400,
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("page {page} is out of range (document has {total} pages)")]
    OutOfRange { page: usize, total: usize },

    #[error("{0}")]
    Failed(String),
}

/// A paginated source the pipeline can rasterise one page at a time.
///
/// Implementations must be cheap to share: the scheduler holds one
/// `Arc<dyn Document>` and renders several pages concurrently.
#[async_trait]
pub trait Document: Send + Sync {
    fn page_count(&self) -> usize;

    /// Render the page at `page_index` (0-based) to an encoded image.
    async fn render_page(
        &self,
        page_index: usize,
        options: RenderOptions,
    ) -> Result<PageImage, RenderError>;
}

/// A PDF file on disk, rendered with pdfium.
pub struct PdfDocument {
    source: ResolvedInput,
    password: Option<String>,
    info: DocumentInfo,
}

impl PdfDocument {
    /// Bind pdfium, open the file once to validate it and read its metadata.
    ///
    /// Fails with [`ExtractError::EmptyDocument`] when the PDF has no pages.
    pub async fn open(
        source: ResolvedInput,
        password: Option<String>,
    ) -> Result<Self, ExtractError> {
        let path = source.path().to_path_buf();
        let pwd = password.clone();

        let info = tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium().map_err(ExtractError::PdfiumBindingFailed)?;
            read_info_blocking(&pdfium, &path, pwd.as_deref())
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Open task panicked: {}", e)))??;

        info!("PDF has {} pages", info.page_count);
        if info.page_count == 0 {
            return Err(ExtractError::EmptyDocument);
        }

        Ok(Self {
            source,
            password,
            info,
        })
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        self.source.path()
    }
}

#[async_trait]
impl Document for PdfDocument {
    fn page_count(&self) -> usize {
        self.info.page_count
    }

    async fn render_page(
        &self,
        page_index: usize,
        options: RenderOptions,
    ) -> Result<PageImage, RenderError> {
        let path = self.source.path().to_path_buf();
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium().map_err(RenderError::Failed)?;
            render_page_blocking(&pdfium, &path, password.as_deref(), page_index, options)
        })
        .await
        .map_err(|e| RenderError::Failed(format!("Render task panicked: {}", e)))?
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the
/// system library search path.
fn bind_pdfium() -> Result<Pdfium, String> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => Pdfium::bind_to_library(PathBuf::from(p)),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| format!("{:?}", e))?;

    Ok(Pdfium::new(bindings))
}

fn load_error(path: &Path, password: Option<&str>, e: PdfiumError) -> ExtractError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            ExtractError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            ExtractError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        ExtractError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

fn read_info_blocking(
    pdfium: &Pdfium,
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentInfo, ExtractError> {
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| load_error(pdf_path, password, e))?;

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentInfo {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}

fn render_page_blocking(
    pdfium: &Pdfium,
    pdf_path: &Path,
    password: Option<&str>,
    page_index: usize,
    options: RenderOptions,
) -> Result<PageImage, RenderError> {
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| RenderError::Failed(format!("{:?}", e)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if page_index >= total {
        return Err(RenderError::OutOfRange {
            page: page_index + 1,
            total,
        });
    }

    let page = pages
        .get(page_index as u16)
        .map_err(|e| RenderError::Failed(format!("{:?}", e)))?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(options.scale)
        .set_maximum_width(options.max_pixels as i32)
        .set_maximum_height(options.max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| RenderError::Failed(format!("{:?}", e)))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_index + 1,
        image.width(),
        image.height()
    );

    encode_page(&image, options.jpeg_quality)
        .map_err(|e| RenderError::Failed(format!("Image encoding failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shareable<T: Send + Sync + 'static>() {}

    #[test]
    fn pdf_document_can_back_a_shared_document() {
        assert_shareable::<PdfDocument>();
        let _: fn(PdfDocument) -> std::sync::Arc<dyn Document> = |d| std::sync::Arc::new(d);
    }

    #[test]
    fn default_render_options() {
        let opts = RenderOptions::default();
        assert_eq!(opts.max_pixels, 2400);
        assert_eq!(opts.jpeg_quality, 85);
    }
}
