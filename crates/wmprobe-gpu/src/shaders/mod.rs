//! WGSL shader sources for GPU compute pipelines.
//! Used by the wgpu backend when the `wgpu` feature is enabled.

#![allow(dead_code)] // Shaders used by wgpu backend

/// Workgroup edge length; must match `backend::TILE_SIZE`.
pub const WORKGROUP_SIZE: u32 = 8;

/// Clamped box average blended with the source pixel.
///
/// Bindings: 0 = source texture, 1 = write-only rgba8unorm output,
/// 2 = 16-byte params block (`ParamsUniform`).
pub const DENOISE: &str = r#"
struct Params {
    radius: u32,
    _pad0: u32,
    blend: f32,
    _pad1: f32,
}

@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var dst_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(src_tex);
    if id.x >= dims.x || id.y >= dims.y { return; }

    let pos = vec2<i32>(id.xy);
    let origin = textureLoad(src_tex, pos, 0);
    let r = i32(params.radius);
    let max_coord = vec2<i32>(dims) - vec2<i32>(1, 1);

    var sum = vec3<f32>(0.0);
    var count = 0.0;
    for (var dy = -r; dy <= r; dy++) {
        for (var dx = -r; dx <= r; dx++) {
            let coord = clamp(pos + vec2<i32>(dx, dy), vec2<i32>(0, 0), max_coord);
            sum += textureLoad(src_tex, coord, 0).rgb;
            count += 1.0;
        }
    }

    let blurred = sum / count;
    let mixed = mix(origin.rgb, blurred, params.blend);
    textureStore(dst_tex, pos, vec4<f32>(mixed, origin.a));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TILE_SIZE;

    #[test]
    fn test_workgroup_matches_tiling() {
        assert_eq!(WORKGROUP_SIZE, TILE_SIZE);
        assert!(DENOISE.contains("@workgroup_size(8, 8)"));
    }
}
