//! The real `ash` + `gpu-allocator` backed [`Device`]/[`CommandList`] pair.
//!
//! Grounded on the allocation pattern in `rad-graph`'s `Image::create`/
//! `destroy` and the `.builder()`-style command recording in `rad-graph`'s
//! `CommandPool`/staging code. Image memory views needed for dynamic
//! rendering are created transiently per render pass rather than cached
//! alongside a resource registry, since this crate's `Device`/`CommandList`
//! boundary is expressed in terms of bare `vk::Image` handles, not the
//! view-carrying resource objects the wider engine those patterns are
//! grounded on actually uses.

use std::sync::Mutex;

use ash::vk;
use gpu_allocator::{
	vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
	MemoryLocation,
};
use tracing::trace;

use crate::{
	device::{
		BlitRegion, CommandList, Device, ImageBarrier, ImageDesc, MemoryBarrier, RenderPassBegin,
	},
	error::Error,
	name::FxHashMap,
	Result,
};

const COLOR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
	aspect_mask: vk::ImageAspectFlags::COLOR,
	base_mip_level: 0,
	level_count: 1,
	base_array_layer: 0,
	layer_count: 1,
};

const DEPTH_STENCIL_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
	aspect_mask: vk::ImageAspectFlags::from_raw(vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw()),
	base_mip_level: 0,
	level_count: 1,
	base_array_layer: 0,
	layer_count: 1,
};

/// A real Vulkan device. Owns the `gpu-allocator` allocator and the table
/// mapping live image handles back to their allocation, since the `Device`
/// trait's `destroy_image` receives only a handle.
pub struct VulkanDevice {
	device: ash::Device,
	queue: vk::Queue,
	allocator: Mutex<Allocator>,
	allocations: Mutex<FxHashMap<u64, Allocation>>,
	valid: bool,
}

impl VulkanDevice {
	pub fn new(device: ash::Device, allocator: Allocator, queue: vk::Queue) -> Self {
		Self { device, queue, allocator: Mutex::new(allocator), allocations: Mutex::new(FxHashMap::default()), valid: true }
	}

	pub fn invalidate(&mut self) { self.valid = false; }

	pub fn raw(&self) -> &ash::Device { &self.device }
}

impl Device for VulkanDevice {
	fn is_valid(&self) -> bool { self.valid }

	fn create_image(&self, desc: ImageDesc, debug_name: &str) -> Result<vk::Image> {
		let image = unsafe {
			self.device.create_image(
				&vk::ImageCreateInfo::builder()
					.image_type(vk::ImageType::TYPE_2D)
					.format(desc.format)
					.extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 })
					.mip_levels(1)
					.array_layers(1)
					.samples(vk::SampleCountFlags::TYPE_1)
					.usage(desc.usage)
					.sharing_mode(vk::SharingMode::EXCLUSIVE)
					.initial_layout(vk::ImageLayout::UNDEFINED),
				None,
			)?
		};

		let requirements = unsafe { self.device.get_image_memory_requirements(image) };
		let allocation = self
			.allocator
			.lock()
			.unwrap()
			.allocate(&AllocationCreateDesc {
				name: debug_name,
				requirements,
				location: MemoryLocation::GpuOnly,
				linear: false,
				allocation_scheme: AllocationScheme::GpuAllocatorManaged,
			})
			.map_err(|e| Error::InvalidDevice(e.to_string()))?;

		unsafe { self.device.bind_image_memory(image, allocation.memory(), allocation.offset())? };

		trace!(name = debug_name, handle = ?image, "created physical image");
		self.allocations.lock().unwrap().insert(image.as_raw(), allocation);
		Ok(image)
	}

	fn destroy_image(&self, image: vk::Image) {
		if let Some(allocation) = self.allocations.lock().unwrap().remove(&image.as_raw()) {
			let _ = self.allocator.lock().unwrap().free(allocation);
		}
		unsafe { self.device.destroy_image(image, None) };
	}

	fn wait_idle(&self) {
		unsafe {
			let _ = self.device.device_wait_idle();
		}
	}

	fn submit(
		&self, list: vk::CommandBuffer, wait_semaphore: vk::Semaphore, wait_stage: vk::PipelineStageFlags2,
		signal_semaphore: vk::Semaphore, fence: vk::Fence,
	) -> Result<()> {
		let wait = [vk::SemaphoreSubmitInfo::builder().semaphore(wait_semaphore).stage_mask(wait_stage).build()];
		let signal = [vk::SemaphoreSubmitInfo::builder()
			.semaphore(signal_semaphore)
			.stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
			.build()];
		let buffers = [vk::CommandBufferSubmitInfo::builder().command_buffer(list).build()];
		let submit = vk::SubmitInfo2::builder()
			.wait_semaphore_infos(&wait)
			.command_buffer_infos(&buffers)
			.signal_semaphore_infos(&signal);
		unsafe { self.device.queue_submit2(self.queue, &[submit.build()], fence)? };
		Ok(())
	}
}

/// A real Vulkan command list: a single primary command buffer plus the
/// transient image views its current render pass needs.
pub struct VulkanCommandList<'d> {
	device: &'d ash::Device,
	buf: vk::CommandBuffer,
	transient_views: Vec<vk::ImageView>,
}

impl<'d> VulkanCommandList<'d> {
	pub fn new(device: &'d ash::Device, buf: vk::CommandBuffer) -> Self { Self { device, buf, transient_views: Vec::new() } }

	fn make_view(&self, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> vk::ImageView {
		let range = vk::ImageSubresourceRange { aspect_mask: aspect, base_mip_level: 0, level_count: 1, base_array_layer: 0, layer_count: 1 };
		unsafe {
			self.device
				.create_image_view(
					&vk::ImageViewCreateInfo::builder()
						.image(image)
						.view_type(vk::ImageViewType::TYPE_2D)
						.format(format)
						.subresource_range(range),
					None,
				)
				.expect("create_image_view")
		}
	}
}

impl<'d> CommandList for VulkanCommandList<'d> {
	fn handle(&self) -> vk::CommandBuffer { self.buf }

	fn begin(&mut self) {
		unsafe {
			self.device
				.begin_command_buffer(
					self.buf,
					&vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
				)
				.expect("begin_command_buffer");
		}
	}

	fn end(&mut self) {
		unsafe { self.device.end_command_buffer(self.buf).expect("end_command_buffer") };
	}

	fn pipeline_barrier(&mut self, image: Option<ImageBarrier>, memory: Option<MemoryBarrier>) {
		let image_barriers: Vec<_> = image
			.map(|b| {
				let aspect =
					if matches!(b.new_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) || matches!(b.old_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) {
						DEPTH_STENCIL_SUBRESOURCE
					} else {
						COLOR_SUBRESOURCE
					};
				vk::ImageMemoryBarrier2::builder()
					.image(b.image)
					.old_layout(b.old_layout)
					.new_layout(b.new_layout)
					.src_stage_mask(b.src_stage)
					.dst_stage_mask(b.dst_stage)
					.src_access_mask(b.src_access)
					.dst_access_mask(b.dst_access)
					.subresource_range(aspect)
					.build()
			})
			.into_iter()
			.collect();

		let memory_barriers: Vec<_> = memory
			.map(|b| {
				vk::MemoryBarrier2::builder()
					.src_stage_mask(b.src_stage)
					.dst_stage_mask(b.dst_stage)
					.src_access_mask(b.src_access)
					.dst_access_mask(b.dst_access)
					.build()
			})
			.into_iter()
			.collect();

		unsafe {
			self.device.cmd_pipeline_barrier2(
				self.buf,
				&vk::DependencyInfo::builder().image_memory_barriers(&image_barriers).memory_barriers(&memory_barriers),
			);
		}
	}

	fn begin_render_pass(&mut self, info: &RenderPassBegin<'_>) {
		if let Some(dep) = info.dependency {
			unsafe {
				let barrier = vk::MemoryBarrier2::builder()
					.src_stage_mask(dep.src_stage)
					.dst_stage_mask(dep.dst_stage)
					.src_access_mask(dep.src_access)
					.dst_access_mask(dep.dst_access)
					.build();
				self.device.cmd_pipeline_barrier2(self.buf, &vk::DependencyInfo::builder().memory_barriers(&[barrier]));
			}
		}

		let color_views: Vec<_> = info
			.color_attachments
			.iter()
			.map(|a| self.make_view(a.image, a.format, vk::ImageAspectFlags::COLOR))
			.collect();
		self.transient_views.extend(&color_views);

		let color_attachments: Vec<_> = info
			.color_attachments
			.iter()
			.zip(&color_views)
			.map(|(a, &view)| {
				vk::RenderingAttachmentInfo::builder()
					.image_view(view)
					.image_layout(a.pass_layout)
					.load_op(a.load_op)
					.store_op(vk::AttachmentStoreOp::STORE)
					.clear_value(vk::ClearValue { color: a.clear.to_vk() })
					.build()
			})
			.collect();

		let area = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width: info.width, height: info.height } };
		let rendering_info = vk::RenderingInfo::builder().render_area(area).layer_count(1).color_attachments(&color_attachments);

		match &info.depth_stencil {
			Some(ds) => {
				let view = self.make_view(ds.image, ds.format, DEPTH_STENCIL_SUBRESOURCE.aspect_mask);
				self.transient_views.push(view);
				let depth_attachment = vk::RenderingAttachmentInfo::builder()
					.image_view(view)
					.image_layout(ds.pass_layout)
					.load_op(ds.depth_load_op)
					.store_op(vk::AttachmentStoreOp::STORE)
					.clear_value(vk::ClearValue { depth_stencil: ds.clear })
					.build();
				let stencil_attachment = vk::RenderingAttachmentInfo::builder()
					.image_view(view)
					.image_layout(ds.pass_layout)
					.load_op(vk::AttachmentLoadOp::DONT_CARE)
					.store_op(vk::AttachmentStoreOp::DONT_CARE)
					.build();
				unsafe {
					self.device.cmd_begin_rendering(
						self.buf,
						&rendering_info.depth_attachment(&depth_attachment).stencil_attachment(&stencil_attachment),
					);
				}
			},
			None => unsafe { self.device.cmd_begin_rendering(self.buf, &rendering_info) },
		}
	}

	fn end_render_pass(&mut self) {
		unsafe { self.device.cmd_end_rendering(self.buf) };
		for view in self.transient_views.drain(..) {
			unsafe { self.device.destroy_image_view(view, None) };
		}
	}

	fn blit_image(
		&mut self, src: vk::Image, src_layout: vk::ImageLayout, dst: vk::Image, dst_layout: vk::ImageLayout, region: BlitRegion,
	) {
		let src_offsets = [
			vk::Offset3D::default(),
			vk::Offset3D { x: region.src_width as i32, y: region.src_height as i32, z: 1 },
		];
		let dst_offsets = [
			vk::Offset3D::default(),
			vk::Offset3D { x: region.dst_width as i32, y: region.dst_height as i32, z: 1 },
		];
		let blit = vk::ImageBlit::builder()
			.src_subresource(vk::ImageSubresourceLayers { aspect_mask: vk::ImageAspectFlags::COLOR, mip_level: 0, base_array_layer: 0, layer_count: 1 })
			.src_offsets(src_offsets)
			.dst_subresource(vk::ImageSubresourceLayers { aspect_mask: vk::ImageAspectFlags::COLOR, mip_level: 0, base_array_layer: 0, layer_count: 1 })
			.dst_offsets(dst_offsets)
			.build();
		unsafe {
			self.device.cmd_blit_image(self.buf, src, src_layout, dst, dst_layout, &[blit], vk::Filter::NEAREST);
		}
	}
}
