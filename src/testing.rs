//! An in-memory `Device`/`CommandList` pair that records the abstract
//! operations it is asked to perform instead of talking to a real GPU.
//!
//! Gated behind the `test-util` feature (and always available under
//! `cfg(test)`) so this crate's own suite — and any downstream integration
//! test — can assert exact operation sequences (P9, S1–S6) without a
//! Vulkan-capable CI runner, the way the grounding corpus's own device
//! tests require a real `Device::new()` but this crate's scope does not
//! assume one is available.

use std::{
	cell::{Cell, RefCell},
	sync::atomic::{AtomicU64, Ordering},
};

use ash::vk;

use crate::{
	device::{BlitRegion, CommandList, Device, ImageBarrier, ImageDesc, MemoryBarrier, RenderPassBegin},
	Result,
};

/// One recorded operation, in the order `RecordingCommandList` saw it.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
	Begin,
	End,
	ImageBarrier { old: vk::ImageLayout, new: vk::ImageLayout },
	MemoryBarrier,
	BeginRenderPass { width: u32, height: u32, color_count: usize, has_depth_stencil: bool, dependency: Option<MemoryBarrier> },
	EndRenderPass,
	Callback,
	Blit { src: vk::Image, dst: vk::Image },
}

static NEXT_IMAGE_HANDLE: AtomicU64 = AtomicU64::new(1);

/// A `Device` that hands out distinct fake `vk::Image` handles and counts
/// how many times each operation was asked for, without touching a real
/// Vulkan instance.
pub struct RecordingDevice {
	created: Cell<u64>,
	destroyed: Cell<u64>,
	wait_idle_called: Cell<bool>,
	valid: bool,
}

impl Default for RecordingDevice {
	fn default() -> Self { Self::new() }
}

impl RecordingDevice {
	pub fn new() -> Self {
		Self { created: Cell::new(0), destroyed: Cell::new(0), wait_idle_called: Cell::new(false), valid: true }
	}

	pub fn invalid() -> Self { Self { valid: false, ..Self::new() } }

	pub fn created_count(&self) -> u64 { self.created.get() }

	pub fn destroyed_count(&self) -> u64 { self.destroyed.get() }

	pub fn wait_idle_called(&self) -> bool { self.wait_idle_called.get() }
}

impl Device for RecordingDevice {
	fn is_valid(&self) -> bool { self.valid }

	fn create_image(&self, _desc: ImageDesc, _debug_name: &str) -> Result<vk::Image> {
		let raw = NEXT_IMAGE_HANDLE.fetch_add(1, Ordering::Relaxed);
		self.created.set(self.created.get() + 1);
		Ok(vk::Image::from_raw(raw))
	}

	fn destroy_image(&self, _image: vk::Image) { self.destroyed.set(self.destroyed.get() + 1); }

	fn wait_idle(&self) { self.wait_idle_called.set(true); }

	fn submit(
		&self, _list: vk::CommandBuffer, _wait_semaphore: vk::Semaphore, _wait_stage: vk::PipelineStageFlags2,
		_signal_semaphore: vk::Semaphore, _fence: vk::Fence,
	) -> Result<()> {
		Ok(())
	}
}

/// A `CommandList` that appends every call it receives to an [`Op`] log
/// instead of recording real Vulkan commands.
#[derive(Default)]
pub struct RecordingCommandList {
	pub ops: RefCell<Vec<Op>>,
}

impl RecordingCommandList {
	pub fn new() -> Self { Self::default() }

	pub fn ops(&self) -> Vec<Op> { self.ops.borrow().clone() }
}

impl CommandList for RecordingCommandList {
	fn handle(&self) -> vk::CommandBuffer { vk::CommandBuffer::null() }

	fn begin(&mut self) { self.ops.get_mut().push(Op::Begin); }

	fn end(&mut self) { self.ops.get_mut().push(Op::End); }

	fn pipeline_barrier(&mut self, image: Option<ImageBarrier>, memory: Option<MemoryBarrier>) {
		if let Some(b) = image {
			self.ops.get_mut().push(Op::ImageBarrier { old: b.old_layout, new: b.new_layout });
		}
		if memory.is_some() {
			self.ops.get_mut().push(Op::MemoryBarrier);
		}
	}

	fn begin_render_pass(&mut self, info: &RenderPassBegin<'_>) {
		self.ops.get_mut().push(Op::BeginRenderPass {
			width: info.width,
			height: info.height,
			color_count: info.color_attachments.len(),
			has_depth_stencil: info.depth_stencil.is_some(),
			dependency: info.dependency,
		});
	}

	fn end_render_pass(&mut self) { self.ops.get_mut().push(Op::EndRenderPass); }

	fn mark_callback(&mut self) { self.ops.get_mut().push(Op::Callback); }

	fn blit_image(
		&mut self, src: vk::Image, _src_layout: vk::ImageLayout, dst: vk::Image, _dst_layout: vk::ImageLayout,
		_region: BlitRegion,
	) {
		self.ops.get_mut().push(Op::Blit { src, dst });
	}
}
