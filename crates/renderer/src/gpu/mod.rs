//! GPU side of the compositor.
//!
//! - `context` owns wgpu instance/device/surface wiring and resolves the
//!   backing-store size on resize.
//! - `resources` is the arena every GPU object is registered in, walked once
//!   at dispose.
//! - `pipeline` compiles the GLSL program and builds the bind group layout and
//!   full-viewport geometry.
//! - `textures` creates and rewrites the base image, LUT and capture textures.
//! - `uniforms` mirrors the fragment shader's parameter block.
//! - `state` glues everything together behind `GpuState`.

mod context;
mod pipeline;
mod resources;
mod state;
mod textures;
mod uniforms;

pub(crate) use context::resolve_backing_size;
pub(crate) use state::GpuState;
