//! Workgroup tiling and device limits.

use crate::readback::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Workgroup edge length in pixels (8x8 invocations per tile).
pub const TILE_SIZE: u32 = 8;

/// Device resource limits.
#[derive(Debug, Clone)]
pub struct GpuLimits {
    /// Maximum texture dimension (width or height).
    pub max_texture_dim: u32,
    /// Row alignment for texture-to-buffer copies, in bytes.
    pub row_alignment: u32,
}

impl Default for GpuLimits {
    fn default() -> Self {
        Self {
            max_texture_dim: 8192,
            row_alignment: COPY_BYTES_PER_ROW_ALIGNMENT,
        }
    }
}

impl GpuLimits {
    /// Check if an image fits in a single texture.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dim && height <= self.max_texture_dim
    }
}

/// Number of workgroups needed to cover `extent` pixels.
pub fn workgroup_count(extent: u32) -> u32 {
    extent.div_ceil(TILE_SIZE)
}

/// One workgroup of the dispatch grid.
///
/// The grid is sized with [`workgroup_count`], so tiles on the right and
/// bottom edges may overshoot the image; invocations outside
/// `(width, height)` must not write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// X offset of the first invocation.
    pub x: u32,
    /// Y offset of the first invocation.
    pub y: u32,
}

impl Tile {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Global ids of every invocation in the tile that lands inside the
    /// image.
    pub fn invocations(&self, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
        let (x0, y0) = (self.x, self.y);
        (0..TILE_SIZE).flat_map(move |ly| (0..TILE_SIZE).map(move |lx| (x0 + lx, y0 + ly)))
            .filter(move |&(gx, gy)| gx < width && gy < height)
    }
}

/// Generate the dispatch grid for an image, row-major.
pub fn generate_tiles(width: u32, height: u32) -> Vec<Tile> {
    let (gx, gy) = (workgroup_count(width), workgroup_count(height));
    let mut tiles = Vec::with_capacity((gx * gy) as usize);

    for ty in 0..gy {
        for tx in 0..gx {
            tiles.push(Tile::new(tx * TILE_SIZE, ty * TILE_SIZE));
        }
    }

    tiles
}
