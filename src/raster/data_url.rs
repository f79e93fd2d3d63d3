//! PNG data URLs: the form images take when they cross a context boundary

use std::io::Cursor;

use base64::Engine as Base64Engine;
use serde::{Deserialize, Serialize};

use crate::raster::RawImage;
use crate::{Error, Result};

const PNG_PREFIX: &str = "data:image/png;base64,";

/// An owned `data:image/png;base64,...` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataUrl(String);

impl DataUrl {
    /// Wrap already-encoded PNG bytes.
    pub fn from_png(png: &[u8]) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD.encode(png);
        DataUrl(format!("{}{}", PNG_PREFIX, b64))
    }

    /// Validate the prefix of an incoming string.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !s.starts_with("data:image/") || !s.contains(";base64,") {
            let head: String = s.chars().take(32).collect();
            return Err(Error::InvalidDataUrl(head));
        }
        Ok(DataUrl(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Decode the base64 payload to raw file bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (_, payload) = self
            .0
            .split_once(";base64,")
            .ok_or_else(|| Error::InvalidDataUrl("missing base64 marker".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| Error::InvalidDataUrl(e.to_string()))
    }

    /// Decode into pixels. The data URL carries no pixel ratio, so the caller
    /// supplies it.
    pub fn decode(&self, device_pixel_ratio: f64) -> Result<RawImage> {
        let bytes = self.to_bytes()?;
        let rgba = image::load_from_memory(&bytes)?.to_rgba8();
        let (w, h) = rgba.dimensions();
        RawImage::new(w, h, device_pixel_ratio, rgba.into_raw())
    }
}

impl std::fmt::Display for DataUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // images are large; show only the shape
        write!(f, "DataUrl({} bytes)", self.0.len())
    }
}

impl RawImage {
    /// Encode as PNG file bytes.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let buffer = image::RgbaImage::from_raw(self.width(), self.height(), self.pixels().to_vec())
            .ok_or_else(|| Error::Other("pixel buffer does not match dimensions".into()))?;
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(buffer).write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)?;
        Ok(out)
    }

    pub fn to_data_url(&self) -> Result<DataUrl> {
        Ok(DataUrl::from_png(&self.to_png()?))
    }
}
