//! An immediate-mode render graph: a per-frame builder, a physical resource
//! cache that persists and reuses device images across frames, and a
//! scheduler that orders declared passes and inserts the barriers their
//! declared hazards require.
//!
//! A typical frame:
//!
//! ```ignore
//! let mut graph = framegraph::create_graph(
//!     &mut subsystem, &device, &mut command_list,
//!     swapchain_image, width, height,
//!     image_acquired, present_ready, frame_complete,
//! )?;
//!
//! let mut gbuffer = graph.add_component("gbuffer")?;
//! gbuffer.add_output_image("albedo", vk::Format::R8G8B8A8_UNORM, width, height, None)?;
//! let mut pass = gbuffer.add_graphics_pass("opaque", width, height, |ctx, list| {
//!     let _image = ctx.get_image("albedo");
//!     // record draw calls into `list`
//! })?;
//! pass.use_color_attachment("albedo", vk::AttachmentLoadOp::CLEAR, Some(ClearColor([0.0; 4])))?;
//!
//! graph.submit(None)?;
//! graph.destroy();
//! ```
//!
//! Name & Handle Layer (`name`), Graph Builder (`builder`), Physical
//! Resource Cache (`storage`), and Compiler/Scheduler/Recorder (`compile`,
//! driven by the `device` traits) are the four collaborating subsystems;
//! see each module's doc comment for its own `(§...)` citations.

pub mod builder;
pub mod compile;
pub mod device;
pub mod error;
pub mod name;
pub mod storage;
pub mod sync;
pub mod vulkan;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use builder::{create_graph, Component, ImageKind, Pass, RenderGraph, SamplerHint};
pub use compile::PassContext;
pub use device::{
	BlitRegion, ClearColor, ColorAttachmentBinding, CommandList, Device, DepthStencilAttachmentBinding, ImageBarrier,
	ImageDesc, MemoryBarrier, RenderPassBegin,
};
pub use error::{Error, Result};
pub use name::Name;
pub use storage::GraphSubsystem;
pub use sync::{is_hazard, Usage};
