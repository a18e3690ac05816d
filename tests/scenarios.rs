//! Integration-level tests for the six scenarios the graph compiler is
//! required to handle exactly (S1-S6), exercised end-to-end through the
//! public builder/compile API against the in-memory recording backend.

use ash::vk;
use framegraph::{
	create_graph,
	device::{ClearColor, MemoryBarrier},
	testing::{Op, RecordingCommandList, RecordingDevice},
	GraphSubsystem,
};

fn null_swapchain() -> (vk::Image, u32, u32, vk::Semaphore, vk::Semaphore, vk::Fence) {
	(vk::Image::null(), 0, 0, vk::Semaphore::null(), vk::Semaphore::null(), vk::Fence::null())
}

#[test]
fn s1_single_component_single_pass_no_clear() {
	let mut subsystem = GraphSubsystem::new();
	let device = RecordingDevice::new();
	let mut list = RecordingCommandList::new();
	let (swap, sw, sh, acquired, ready, fence) = null_swapchain();

	{
		let mut graph = create_graph(&mut subsystem, &device, &mut list, swap, sw, sh, acquired, ready, fence).unwrap();
		let mut c1 = graph.add_component("c1").unwrap();
		c1.add_output_image("col", vk::Format::R8G8B8A8_UNORM, 100, 100, None).unwrap();
		let mut p1 = c1.add_graphics_pass("p1", 100, 100, |_ctx, _list| {}).unwrap();
		p1.use_color_attachment("col", vk::AttachmentLoadOp::LOAD, None).unwrap();

		graph.submit(None).unwrap();
		graph.destroy();
	}

	let ops = list.ops();
	assert_eq!(
		ops,
		vec![
			Op::Begin,
			Op::BeginRenderPass { width: 100, height: 100, color_count: 1, has_depth_stencil: false, dependency: None },
			Op::Callback,
			Op::EndRenderPass,
			Op::End,
		]
	);
}

#[test]
fn s2_producer_to_sampled_consumer_in_one_component() {
	let mut subsystem = GraphSubsystem::new();
	let device = RecordingDevice::new();
	let mut list = RecordingCommandList::new();
	let (swap, sw, sh, acquired, ready, fence) = null_swapchain();

	{
		let mut graph = create_graph(&mut subsystem, &device, &mut list, swap, sw, sh, acquired, ready, fence).unwrap();
		let mut c1 = graph.add_component("c1").unwrap();
		c1.add_output_image("col", vk::Format::R8G8B8A8_UNORM, 64, 64, None).unwrap();

		let mut a = c1.add_graphics_pass("a", 64, 64, |_ctx, _list| {}).unwrap();
		a.use_color_attachment("col", vk::AttachmentLoadOp::CLEAR, Some(ClearColor([1.0, 0.0, 0.0, 1.0]))).unwrap();

		let mut b = c1.add_graphics_pass("b", 64, 64, |_ctx, _list| {}).unwrap();
		b.use_image_sampled("col").unwrap();

		graph.submit(None).unwrap();
		graph.destroy();
	}

	let ops = list.ops();
	// Pass `a` only declares a color attachment; pass `b` only declares a
	// sampled read. The dependency's src side must carry `a`'s masks and
	// its dst side `b`'s, not the same pass's masks on both sides.
	let expected_dependency = MemoryBarrier {
		src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
		dst_stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
		src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
		dst_access: vk::AccessFlags2::SHADER_READ,
	};
	assert_eq!(
		ops,
		vec![
			Op::Begin,
			Op::BeginRenderPass { width: 64, height: 64, color_count: 1, has_depth_stencil: false, dependency: None },
			Op::Callback,
			Op::EndRenderPass,
			Op::ImageBarrier { old: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL },
			Op::BeginRenderPass {
				width: 64,
				height: 64,
				color_count: 0,
				has_depth_stencil: false,
				dependency: Some(expected_dependency),
			},
			Op::Callback,
			Op::EndRenderPass,
			Op::End,
		]
	);
}

#[test]
fn s3_cross_component_pipe() {
	let mut subsystem = GraphSubsystem::new();
	let device = RecordingDevice::new();
	let mut list = RecordingCommandList::new();
	let (swap, sw, sh, acquired, ready, fence) = null_swapchain();

	{
		let mut graph = create_graph(&mut subsystem, &device, &mut list, swap, sw, sh, acquired, ready, fence).unwrap();

		let mut c1 = graph.add_component("c1").unwrap();
		c1.add_output_image("img", vk::Format::R8G8B8A8_UNORM, 64, 64, None).unwrap();
		let mut pa = c1.add_graphics_pass("pa", 64, 64, |_ctx, _list| {}).unwrap();
		pa.use_color_attachment("img", vk::AttachmentLoadOp::CLEAR, Some(ClearColor::default())).unwrap();

		let mut c2 = graph.add_component("c2").unwrap();
		c2.add_input_image("input", vk::Format::R8G8B8A8_UNORM, 64, 64).unwrap();
		let mut pb = c2.add_graphics_pass("pb", 64, 64, |_ctx, _list| {}).unwrap();
		pb.use_image_sampled("input").unwrap();

		graph.connect_image("c1", "img", "c2", "input").unwrap();

		graph.submit(None).unwrap();
		graph.destroy();
	}

	assert_eq!(device.created_count(), 1, "pa and pb must share the single physical image behind img/input");

	let ops = list.ops();
	// pa only declares a color attachment; pb (in the other component) only
	// declares a sampled read of the same physical image via the connection.
	let expected_dependency = MemoryBarrier {
		src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
		dst_stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
		src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
		dst_access: vk::AccessFlags2::SHADER_READ,
	};
	assert_eq!(
		ops,
		vec![
			Op::Begin,
			Op::BeginRenderPass { width: 64, height: 64, color_count: 1, has_depth_stencil: false, dependency: None },
			Op::Callback,
			Op::EndRenderPass,
			Op::ImageBarrier { old: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL },
			Op::BeginRenderPass {
				width: 64,
				height: 64,
				color_count: 0,
				has_depth_stencil: false,
				dependency: Some(expected_dependency),
			},
			Op::Callback,
			Op::EndRenderPass,
			Op::End,
		]
	);
}

#[test]
fn s4_invalidation_on_format_change() {
	let mut subsystem = GraphSubsystem::new();
	let device = RecordingDevice::new();

	{
		let mut list = RecordingCommandList::new();
		let (swap, sw, sh, acquired, ready, fence) = null_swapchain();
		let mut graph = create_graph(&mut subsystem, &device, &mut list, swap, sw, sh, acquired, ready, fence).unwrap();
		let mut c1 = graph.add_component("c1").unwrap();
		c1.add_output_image("x", vk::Format::R8G8B8A8_UNORM, 64, 64, None).unwrap();
		let mut p = c1.add_graphics_pass("p", 64, 64, |_ctx, _list| {}).unwrap();
		p.use_color_attachment("x", vk::AttachmentLoadOp::LOAD, None).unwrap();
		graph.submit(None).unwrap();
		graph.destroy();
	}
	assert_eq!(device.created_count(), 1);

	{
		let mut list = RecordingCommandList::new();
		let (swap, sw, sh, acquired, ready, fence) = null_swapchain();
		let mut graph = create_graph(&mut subsystem, &device, &mut list, swap, sw, sh, acquired, ready, fence).unwrap();
		let mut c1 = graph.add_component("c1").unwrap();
		c1.add_output_image("x", vk::Format::R16_SFLOAT, 64, 64, None).unwrap();
		let mut p = c1.add_graphics_pass("p", 64, 64, |_ctx, _list| {}).unwrap();
		p.use_color_attachment("x", vk::AttachmentLoadOp::LOAD, None).unwrap();
		graph.submit(None).unwrap();
		graph.destroy();
	}

	assert_eq!(device.created_count(), 2);
	assert_eq!(device.destroyed_count(), 1);
	assert!(device.wait_idle_called());
}

#[test]
fn s5_usage_widening_never_invalidates() {
	let mut subsystem = GraphSubsystem::new();
	let device = RecordingDevice::new();

	{
		let mut list = RecordingCommandList::new();
		let (swap, sw, sh, acquired, ready, fence) = null_swapchain();
		let mut graph = create_graph(&mut subsystem, &device, &mut list, swap, sw, sh, acquired, ready, fence).unwrap();
		let mut c1 = graph.add_component("c1").unwrap();
		c1.add_output_image("x", vk::Format::R8G8B8A8_UNORM, 64, 64, None).unwrap();
		let mut p = c1.add_graphics_pass("p", 64, 64, |_ctx, _list| {}).unwrap();
		p.use_color_attachment("x", vk::AttachmentLoadOp::LOAD, None).unwrap();
		graph.submit(None).unwrap();
		graph.destroy();
	}
	assert_eq!(device.created_count(), 1);

	{
		let mut list = RecordingCommandList::new();
		let (swap, sw, sh, acquired, ready, fence) = null_swapchain();
		let mut graph = create_graph(&mut subsystem, &device, &mut list, swap, sw, sh, acquired, ready, fence).unwrap();
		let mut c1 = graph.add_component("c1").unwrap();
		c1.add_output_image("x", vk::Format::R8G8B8A8_UNORM, 64, 64, None).unwrap();
		let mut writer = c1.add_graphics_pass("writer", 64, 64, |_ctx, _list| {}).unwrap();
		writer.use_color_attachment("x", vk::AttachmentLoadOp::LOAD, None).unwrap();
		let mut reader = c1.add_graphics_pass("reader", 64, 64, |_ctx, _list| {}).unwrap();
		reader.use_image_sampled("x").unwrap();
		graph.submit(None).unwrap();
		graph.destroy();
	}

	assert_eq!(device.created_count(), 1, "widening usage must reuse the existing physical image");
}

#[test]
fn s6_swapchain_final_path() {
	let mut subsystem = GraphSubsystem::new();
	let device = RecordingDevice::new();
	let mut list = RecordingCommandList::new();
	let swap = vk::Image::from_raw(0xdead_beef);
	let acquired = vk::Semaphore::null();
	let ready = vk::Semaphore::null();
	let fence = vk::Fence::null();

	{
		let mut graph = create_graph(&mut subsystem, &device, &mut list, swap, 64, 64, acquired, ready, fence).unwrap();
		let mut c1 = graph.add_component("c1").unwrap();
		c1.add_output_image("col", vk::Format::R8G8B8A8_UNORM, 64, 64, None).unwrap();
		let mut p = c1.add_graphics_pass("p", 64, 64, |_ctx, _list| {}).unwrap();
		p.use_color_attachment("col", vk::AttachmentLoadOp::CLEAR, Some(ClearColor::default())).unwrap();

		graph.connect_swapchain_image("c1", "col").unwrap();
		graph.submit(None).unwrap();
		graph.destroy();
	}

	let ops = list.ops();
	let tail = &ops[ops.len() - 5..ops.len() - 1];
	assert_eq!(
		tail,
		&[
			Op::ImageBarrier { old: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL },
			Op::ImageBarrier { old: vk::ImageLayout::UNDEFINED, new: vk::ImageLayout::TRANSFER_DST_OPTIMAL },
			Op::Blit { src: ops_blit_src(&ops), dst: swap },
			Op::ImageBarrier { old: vk::ImageLayout::TRANSFER_DST_OPTIMAL, new: vk::ImageLayout::PRESENT_SRC_KHR },
		]
	);
	assert_eq!(ops.last(), Some(&Op::End));
}

fn ops_blit_src(ops: &[Op]) -> vk::Image {
	ops.iter()
		.find_map(|op| if let Op::Blit { src, .. } = op { Some(*src) } else { None })
		.expect("a blit op must have been recorded")
}
