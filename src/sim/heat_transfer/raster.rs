//! Raster footprints.
//!
//! Decoding image files is left to the caller through [`RasterDecoder`];
//! this module only classifies decoded pixels into mesh node properties.

use std::collections::HashMap;
use std::error::Error;

/// 8-bit RGB colour.
pub type Rgb = [u8; 3];

/// Decoded image, row-major with row 0 at the top.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Rgb>,
}

impl PixelGrid {
    pub fn new(width: usize, height: usize, fill: Rgb) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; width * height],
        }
    }

    /// Builds a grid from rows listed top to bottom.
    pub fn from_rows(rows: &[Vec<Rgb>]) -> Self {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        Self {
            width,
            height,
            pixels: rows.iter().flatten().copied().collect(),
        }
    }

    /// Pixel at column `x` of image row `row` (0 = top).
    pub fn get(&self, x: usize, row: usize) -> Rgb {
        self.pixels[row * self.width + x]
    }

    pub fn set(&mut self, x: usize, row: usize, rgb: Rgb) {
        self.pixels[row * self.width + x] = rgb;
    }
}

/// Turns an image path into pixels.
pub trait RasterDecoder: Send + Sync {
    fn decode(&self, path: &str) -> Result<PixelGrid, Box<dyn Error + Send + Sync>>;
}

/// Decoder backed by grids registered in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRaster {
    images: HashMap<String, PixelGrid>,
}

impl InMemoryRaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, path: &str, grid: PixelGrid) -> Self {
        self.images.insert(path.to_string(), grid);
        self
    }
}

impl RasterDecoder for InMemoryRaster {
    fn decode(&self, path: &str) -> Result<PixelGrid, Box<dyn Error + Send + Sync>> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| format!("no image registered under '{path}'").into())
    }
}

/// Which stackup column a pixel class uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSelector {
    /// Region with no partial-coverage feature present.
    Background,
    /// Region with every partial-coverage feature present.
    Pour,
    /// Area-weighted blend of all regions.
    Blended,
    Index(usize),
}

/// Properties a colour stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelClass {
    pub label: String,
    pub region: RegionSelector,
    /// Via name whose footprint this pixel belongs to.
    pub via: Option<String>,
    /// Heat injected per pixel (W).
    pub heat: f64,
    pub tags: Vec<String>,
}

impl PixelClass {
    pub fn new(label: &str, region: RegionSelector) -> Self {
        Self {
            label: label.to_string(),
            region,
            via: None,
            heat: 0.0,
            tags: Vec::new(),
        }
    }

    pub fn with_heat(mut self, heat: f64) -> Self {
        self.heat = heat;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn with_via(mut self, via: &str) -> Self {
        self.via = Some(via.to_string());
        self
    }
}

/// Heat per red pixel in the default table (W).
pub const DEFAULT_HEAT_PER_PIXEL: f64 = 48e-6;

/// Colour table. Colours not listed are holes.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorMap {
    entries: Vec<(Rgb, PixelClass)>,
}

impl ColorMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Red heated copper, green copper, blue copper held at the `iso`
    /// boundary, yellow bare laminate. White and anything else is a hole.
    pub fn default_table() -> Self {
        Self::new()
            .with(
                [255, 0, 0],
                PixelClass::new("heat", RegionSelector::Pour).with_heat(DEFAULT_HEAT_PER_PIXEL),
            )
            .with([0, 255, 0], PixelClass::new("copper", RegionSelector::Pour))
            .with(
                [0, 0, 255],
                PixelClass::new("iso", RegionSelector::Pour).with_tag("iso"),
            )
            .with(
                [255, 255, 0],
                PixelClass::new("base", RegionSelector::Background),
            )
    }

    /// Adds or replaces the class of a colour.
    pub fn with(mut self, rgb: Rgb, class: PixelClass) -> Self {
        self.entries.retain(|(c, _)| *c != rgb);
        self.entries.push((rgb, class));
        self
    }

    pub fn classify(&self, rgb: Rgb) -> Option<&PixelClass> {
        self.entries
            .iter()
            .find(|(c, _)| *c == rgb)
            .map(|(_, class)| class)
    }

    /// Position of the class of a colour in [`ColorMap::classes`] order.
    pub fn class_index(&self, rgb: Rgb) -> Option<usize> {
        self.entries.iter().position(|(c, _)| *c == rgb)
    }

    pub fn classes(&self) -> impl Iterator<Item = &PixelClass> {
        self.entries.iter().map(|(_, class)| class)
    }
}

impl Default for ColorMap {
    fn default() -> Self {
        Self::default_table()
    }
}
