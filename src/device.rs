//! The boundary to the external GPU device and command-list collaborators
//! (§1 "External collaborators", Design Notes "Polymorphic pass callbacks").
//!
//! The core never talks to a concrete Vulkan instance/device directly; it
//! talks to these two traits. [`crate::vulkan`] provides a real `ash` +
//! `gpu-allocator` backed implementation; [`crate::testing`] provides an
//! in-memory recording implementation used by this crate's own tests.

use ash::vk;

use crate::Result;

/// What the cache needs in order to (re)create a physical image.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct ImageDesc {
	pub format: vk::Format,
	pub usage: vk::ImageUsageFlags,
	pub width: u32,
	pub height: u32,
}

/// The GPU device abstraction the core is compiled against.
///
/// Modeled narrowly: the core only ever allocates images, waits for
/// in-flight GPU work to finish before invalidating a cached image, and
/// submits exactly one command list per frame.
pub trait Device {
	/// Whether this device handle is usable. `create_graph` fails with
	/// `InvalidDevice` when this returns `false`.
	fn is_valid(&self) -> bool { true }

	/// Allocate a 2D image matching `desc`, with `debug_name` set for
	/// tooling where supported.
	fn create_image(&self, desc: ImageDesc, debug_name: &str) -> Result<vk::Image>;

	/// Destroy a previously allocated image. Never called while a frame
	/// that may reference it is still in flight; callers `wait_idle` first.
	fn destroy_image(&self, image: vk::Image);

	/// Block until all GPU work submitted so far has completed.
	fn wait_idle(&self);

	/// Submit `list` to the graphics queue, waiting on `wait_semaphore` at
	/// `wait_stage`, signalling `signal_semaphore`, and signalling `fence`
	/// once the submission completes.
	fn submit(
		&self, list: vk::CommandBuffer, wait_semaphore: vk::Semaphore, wait_stage: vk::PipelineStageFlags2,
		signal_semaphore: vk::Semaphore, fence: vk::Fence,
	) -> Result<()>;
}

/// A single image memory barrier.
#[derive(Copy, Clone, Debug)]
pub struct ImageBarrier {
	pub image: vk::Image,
	pub old_layout: vk::ImageLayout,
	pub new_layout: vk::ImageLayout,
	pub src_stage: vk::PipelineStageFlags2,
	pub dst_stage: vk::PipelineStageFlags2,
	pub src_access: vk::AccessFlags2,
	pub dst_access: vk::AccessFlags2,
}

/// A global memory barrier with no layout transition, used for the
/// inter-pass dependency (§4.4 step 4).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MemoryBarrier {
	pub src_stage: vk::PipelineStageFlags2,
	pub dst_stage: vk::PipelineStageFlags2,
	pub src_access: vk::AccessFlags2,
	pub dst_access: vk::AccessFlags2,
}

/// A plain `[f32; 4]` stand-in for `vk::ClearColorValue`: the ash type is a
/// union and so cannot derive `Debug`/`PartialEq`, which this crate's
/// assertions and recorder need.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ClearColor(pub [f32; 4]);

impl ClearColor {
	pub fn to_vk(self) -> vk::ClearColorValue { vk::ClearColorValue { float32: self.0 } }
}

#[derive(Copy, Clone, Debug)]
pub struct ColorAttachmentBinding {
	pub image: vk::Image,
	pub format: vk::Format,
	pub initial_layout: vk::ImageLayout,
	pub pass_layout: vk::ImageLayout,
	pub load_op: vk::AttachmentLoadOp,
	pub clear: ClearColor,
}

#[derive(Copy, Clone, Debug)]
pub struct DepthStencilAttachmentBinding {
	pub image: vk::Image,
	pub format: vk::Format,
	pub initial_layout: vk::ImageLayout,
	pub pass_layout: vk::ImageLayout,
	pub depth_load_op: vk::AttachmentLoadOp,
	pub clear: vk::ClearDepthStencilValue,
}

pub struct RenderPassBegin<'a> {
	pub width: u32,
	pub height: u32,
	pub color_attachments: &'a [ColorAttachmentBinding],
	pub depth_stencil: Option<DepthStencilAttachmentBinding>,
	/// The inter-pass dependency (§4.4 step 4): the accumulated
	/// access/stage mask every preceding pass's writes must be visible to
	/// before this one begins. `None` only for the first pass in
	/// submission order.
	pub dependency: Option<MemoryBarrier>,
}

#[derive(Copy, Clone, Debug)]
pub struct BlitRegion {
	pub src_width: u32,
	pub src_height: u32,
	pub dst_width: u32,
	pub dst_height: u32,
}

/// The command-list abstraction the recorder writes to (§1 "command list",
/// Design Notes "Polymorphic pass callbacks").
pub trait CommandList {
	fn handle(&self) -> vk::CommandBuffer;
	fn begin(&mut self);
	fn end(&mut self);
	/// Insert a pipeline barrier. Either field may be present; both may be
	/// present at once (the sampled-image pre-barrier uses only `image`,
	/// the inter-pass dependency uses only `memory`).
	fn pipeline_barrier(&mut self, image: Option<ImageBarrier>, memory: Option<MemoryBarrier>);
	fn begin_render_pass(&mut self, info: &RenderPassBegin<'_>);
	fn end_render_pass(&mut self);
	/// Called once the pass callback returns, between `begin_render_pass`
	/// and `end_render_pass`. A no-op for a real device; recording
	/// implementations use it to mark where user draw commands land in the
	/// operation sequence.
	fn mark_callback(&mut self) {}
	fn blit_image(
		&mut self, src: vk::Image, src_layout: vk::ImageLayout, dst: vk::Image, dst_layout: vk::ImageLayout,
		region: BlitRegion,
	);
}
