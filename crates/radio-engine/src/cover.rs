//! Cover art: resize-on-demand with an LRU cache and tracked buffer handles.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use lru::LruCache;
use radio_types::CoverSize;

const JPEG_QUALITY: u8 = 85;

/// Owned cover image bytes (JPEG). Empty when no cover is available.
///
/// The buffer is released when the handle drops; the owning cache counts live handles.
#[derive(Debug)]
pub struct CoverArt {
    bytes: Arc<[u8]>,
    live: Arc<AtomicUsize>,
}

impl CoverArt {
    fn new(bytes: Arc<[u8]>, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self {
            bytes,
            live: live.clone(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Deref for CoverArt {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for CoverArt {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Cover bytes as received for one track.
#[derive(Clone, Debug)]
pub(crate) struct SourceCover {
    pub(crate) track_seq: u64,
    pub(crate) bytes: Arc<[u8]>,
    /// Size the server was asked for; requests for it skip re-encoding.
    pub(crate) negotiated: CoverSize,
}

pub(crate) struct CoverCache {
    entries: Mutex<LruCache<(u64, CoverSize), Arc<[u8]>>>,
    live: Arc<AtomicUsize>,
    empty: Arc<[u8]>,
}

impl CoverCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            live: Arc::new(AtomicUsize::new(0)),
            empty: Arc::from(Vec::new()),
        }
    }

    /// Handles not yet dropped.
    pub(crate) fn outstanding(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub(crate) fn empty(&self) -> CoverArt {
        CoverArt::new(self.empty.clone(), &self.live)
    }

    pub(crate) fn get(&self, source: Option<&SourceCover>, size: CoverSize) -> CoverArt {
        let Some(source) = source.filter(|s| !s.bytes.is_empty()) else {
            return self.empty();
        };
        let bytes = match size.dimension() {
            _ if size.is_suppressed() => self.empty.clone(),
            None => source.bytes.clone(),
            Some(_) if size == source.negotiated => source.bytes.clone(),
            Some(edge) => self.resized(source, size, edge),
        };
        CoverArt::new(bytes, &self.live)
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn resized(&self, source: &SourceCover, size: CoverSize, edge: u32) -> Arc<[u8]> {
        let key = (source.track_seq, size);
        if let Some(hit) = self.entries.lock().ok().and_then(|mut e| e.get(&key).cloned()) {
            return hit;
        }

        let bytes: Arc<[u8]> = match resize_jpeg(&source.bytes, edge) {
            Ok(Some(resized)) => Arc::from(resized),
            Ok(None) => source.bytes.clone(),
            Err(e) => {
                tracing::warn!(error = %e, size = size.code(), "cover decode failed");
                self.empty.clone()
            }
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key, bytes.clone());
        }
        bytes
    }
}

/// Downscale so the longest edge is at most `edge`. `Ok(None)` when already small enough.
fn resize_jpeg(bytes: &[u8], edge: u32) -> image::ImageResult<Option<Vec<u8>>> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();
    if w.max(h) <= edge {
        return Ok(None);
    }
    let resized = img.resize(edge, edge, FilterType::Triangle);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
    Ok(Some(out.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn jpeg(w: u32, h: u32) -> Arc<[u8]> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([200, 40, 90])));
        let mut out = Cursor::new(Vec::new());
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, 90))
            .unwrap();
        Arc::from(out.into_inner())
    }

    fn source(bytes: Arc<[u8]>) -> SourceCover {
        SourceCover {
            track_seq: 1,
            bytes,
            negotiated: CoverSize::High,
        }
    }

    #[test]
    fn no_cover_and_missing_cover_are_empty() {
        let cache = CoverCache::new(4);
        assert!(cache.get(None, CoverSize::High).is_empty());
        let src = source(jpeg(32, 32));
        assert!(cache.get(Some(&src), CoverSize::NoCover).is_empty());
        let empty = source(Arc::from(Vec::new()));
        assert!(cache.get(Some(&empty), CoverSize::Full).is_empty());
    }

    #[test]
    fn negotiated_and_full_sizes_return_original() {
        let cache = CoverCache::new(4);
        let src = source(jpeg(900, 600));
        assert_eq!(cache.get(Some(&src), CoverSize::Full).bytes(), &*src.bytes);
        assert_eq!(cache.get(Some(&src), CoverSize::High).bytes(), &*src.bytes);
    }

    #[test]
    fn downscales_to_requested_edge() {
        let cache = CoverCache::new(4);
        let src = source(jpeg(900, 600));
        let small = cache.get(Some(&src), CoverSize::Min);
        let decoded = image::load_from_memory(&small).unwrap();
        assert_eq!(decoded.dimensions(), (128, 85));

        let again = cache.get(Some(&src), CoverSize::Min);
        assert_eq!(small.bytes(), again.bytes());
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let cache = CoverCache::new(4);
        let src = source(jpeg(100, 100));
        assert_eq!(cache.get(Some(&src), CoverSize::Low).bytes(), &*src.bytes);
    }

    #[test]
    fn undecodable_cover_yields_empty() {
        let cache = CoverCache::new(4);
        let src = source(Arc::from(&b"not a jpeg"[..]));
        assert!(cache.get(Some(&src), CoverSize::Medium).is_empty());
    }

    #[test]
    fn handles_are_counted_until_dropped() {
        let cache = CoverCache::new(4);
        let src = source(jpeg(16, 16));
        let a = cache.get(Some(&src), CoverSize::High);
        let b = cache.get(None, CoverSize::High);
        assert_eq!(cache.outstanding(), 2);
        drop(a);
        drop(b);
        assert_eq!(cache.outstanding(), 0);
    }
}
