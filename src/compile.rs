//! The Compiler/Scheduler (§4.4): topological ordering, barrier insertion,
//! per-pass recording and submission.

use ash::vk;
use tracing::{debug, debug_span, trace, warn};

use crate::{
	builder::{dereference, ComponentData, RenderGraph},
	device::{
		BlitRegion, ColorAttachmentBinding, DepthStencilAttachmentBinding, ImageBarrier, MemoryBarrier, RenderPassBegin,
	},
	name::Name,
	storage::GraphSubsystem,
	Result,
};

/// What a pass callback is handed: the means to resolve a declared image
/// name to its live device handle, valid only for the duration of the
/// callback (§6 "PassContext").
pub struct PassContext<'a> {
	components: &'a [ComponentData],
	subsystem: &'a GraphSubsystem,
	component_idx: usize,
	width: u32,
	height: u32,
}

impl<'a> PassContext<'a> {
	/// `ctx.get_image(name)` (§4.2 `get_image`). A `PassContext` only
	/// exists for the duration of the callback that owns it, so there is no
	/// separate in/out-of-scope flag to check here — the scope guard lives
	/// in how `record_pass` constructs and drops it.
	pub fn get_image(&self, name: &str) -> vk::Image {
		let n = Name::new(name);
		let (comp, resolved) = dereference(self.components, self.component_idx, n);
		let comp_name = self.components[comp].name;
		self.subsystem
			.peek_handle(comp_name, resolved)
			.unwrap_or_else(|| panic!("{name}: no physical image bound (OutOfScope)"))
	}

	/// The pass's declared width/height, as passed to
	/// `add_graphics_pass`.
	pub fn extent(&self) -> (u32, u32) { (self.width, self.height) }
}

impl<'g> RenderGraph<'g> {
	/// DFS post-order visit, matching the topological-sort convention this
	/// crate is grounded on: edges mean "source must run before
	/// destination", so a post-order walk followed by a reversal yields a
	/// valid schedule.
	fn topological_sort(&self) -> Vec<usize> {
		let n = self.passes.len();
		let mut state = vec![0u8; n]; // 0 = unvisited, 1 = in-progress, 2 = done
		let mut order = Vec::with_capacity(n);

		fn visit(p: usize, passes: &[crate::builder::PassNode<'_>], state: &mut [u8], order: &mut Vec<usize>) {
			match state[p] {
				2 => return,
				1 => panic!("render graph has a cycle (Cycle)"),
				_ => {},
			}
			state[p] = 1;
			for &next in &passes[p].edges {
				visit(next, passes, state, order);
			}
			state[p] = 2;
			order.push(p);
		}

		for p in 0..n {
			visit(p, &self.passes, &mut state, &mut order);
		}
		order.reverse();
		order
	}

	/// Write a Graphviz DOT representation of the declared pass graph to
	/// `path`, for diagnostics (§6 `save_graph_to_dot`).
	pub fn save_graph_to_dot(&self, path: &std::path::Path) -> std::io::Result<()> {
		let mut out = String::from("digraph rendergraph {\n");
		for (idx, pass) in self.passes.iter().enumerate() {
			let comp = &self.components[pass.component];
			out.push_str(&format!("  n{idx} [label=\"{}::{}\"];\n", comp.debug_name, pass.debug_name));
		}
		for (idx, pass) in self.passes.iter().enumerate() {
			for &dst in &pass.edges {
				out.push_str(&format!("  n{idx} -> n{dst};\n"));
			}
		}
		out.push_str("}\n");
		std::fs::write(path, out)
	}

	/// `graph.submit(saveDot)` (§4.4). Consumes nothing; the caller drops
	/// the graph (calling [`RenderGraph::destroy`]) once submission
	/// returns.
	pub fn submit(&mut self, save_dot: Option<&std::path::Path>) -> Result<()> {
		let _span = debug_span!("render_graph_submit").entered();
		let order = self.topological_sort();

		if let Some(path) = save_dot {
			if let Err(e) = self.save_graph_to_dot(path) {
				warn!(error = %e, "failed to write render graph dot file");
			}
		}

		self.list.begin();

		for (pos, &pass_id) in order.iter().enumerate() {
			let prev_pass_id = pos.checked_sub(1).map(|i| order[i]);
			self.record_pass(pass_id, prev_pass_id)?;
		}

		if let Some((comp, name)) = self.blit {
			self.record_blit(comp, name)?;
		}

		self.list.end();

		self.device.submit(
			self.list.handle(),
			self.image_acquired,
			vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
			self.present_ready,
			self.frame_complete,
		)?;

		Ok(())
	}

	fn record_pass(&mut self, pass_id: usize, prev_pass_id: Option<usize>) -> Result<()> {
		let component = self.passes[pass_id].component;

		// Sampled-image pre-barriers: every SAMPLED name this pass declared
		// transitions from whatever it last was to SHADER_READ_ONLY_OPTIMAL
		// before the pass begins.
		let sampled: Vec<Name> = self.passes[pass_id].sampled_images.clone();
		for name in sampled {
			let (comp, resolved) = dereference(&self.components, component, name);
			let comp_name = self.components[comp].name;
			let old_layout = self.subsystem.last_layout(comp_name, resolved);
			let image = self
				.subsystem
				.peek_handle(comp_name, resolved)
				.expect("sampled image must already have a physical backing by the time its pass runs");
			self.list.pipeline_barrier(
				Some(ImageBarrier {
					image,
					old_layout,
					new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
					src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
					dst_stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
					src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
					dst_access: vk::AccessFlags2::empty(),
				}),
				None,
			);
			self.subsystem.set_last_layout(comp_name, resolved, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
		}

		// The dependency's src side is the immediately preceding pass's
		// accumulated masks (what it wrote), and the dst side is this pass's
		// (what it is about to do) — not the same pass on both sides.
		let dependency = prev_pass_id.map(|prev_id| {
			let prev = &self.passes[prev_id];
			let cur = &self.passes[pass_id];
			MemoryBarrier {
				src_stage: prev.stage_mask,
				dst_stage: cur.stage_mask,
				src_access: prev.access_mask,
				dst_access: cur.access_mask,
			}
		});

		let color_decls = self.passes[pass_id].color_attachments.clone();
		let mut color_bindings = Vec::with_capacity(color_decls.len());
		for decl in &color_decls {
			let (comp, resolved) = dereference(&self.components, component, decl.name);
			let comp_name = self.components[comp].name;
			let (format, width, height, usage) = {
				let node = self.components[comp].images.get(&resolved).expect("declared image node must exist");
				(node.format, node.width, node.height, node.usage)
			};
			let image = self.subsystem.get_or_create_image(
				self.device,
				comp_name,
				resolved,
				format,
				width,
				height,
				usage,
				&self.components[comp].images[&resolved].debug_name,
			)?;
			let initial_layout = self.subsystem.last_layout(comp_name, resolved);
			let pass_layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
			self.subsystem.set_last_layout(comp_name, resolved, pass_layout);
			color_bindings.push(ColorAttachmentBinding {
				image,
				format,
				initial_layout,
				pass_layout,
				load_op: decl.load_op,
				clear: decl.clear.unwrap_or_default(),
			});
		}

		let depth_stencil_decl = self.passes[pass_id].depth_stencil.clone();
		let depth_stencil_binding = match depth_stencil_decl {
			Some(decl) => {
				let (comp, resolved) = dereference(&self.components, component, decl.name);
				let comp_name = self.components[comp].name;
				let (format, width, height, usage) = {
					let node = self.components[comp].images.get(&resolved).expect("declared image node must exist");
					(node.format, node.width, node.height, node.usage)
				};
				let image = self.subsystem.get_or_create_image(
					self.device,
					comp_name,
					resolved,
					format,
					width,
					height,
					usage,
					&self.components[comp].images[&resolved].debug_name,
				)?;
				let initial_layout = self.subsystem.last_layout(comp_name, resolved);
				let pass_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
				self.subsystem.set_last_layout(comp_name, resolved, pass_layout);
				Some(DepthStencilAttachmentBinding {
					image,
					format,
					initial_layout,
					pass_layout,
					depth_load_op: decl.load_op,
					clear: decl.clear.unwrap_or_default(),
				})
			},
			None => None,
		};

		let (width, height, debug_name) = {
			let p = &self.passes[pass_id];
			(p.width, p.height, p.debug_name.clone())
		};
		trace!(pass = %debug_name, "begin render pass");
		self.list.begin_render_pass(&RenderPassBegin {
			width,
			height,
			color_attachments: &color_bindings,
			depth_stencil: depth_stencil_binding,
			dependency,
		});

		self.passes[pass_id].is_callback_scope = true;
		let callback = self.passes[pass_id].callback.take();
		if let Some(cb) = callback {
			let ctx = PassContext { components: &self.components, subsystem: &*self.subsystem, component_idx: component, width, height };
			cb(&ctx, &mut *self.list);
			self.list.mark_callback();
		}
		self.passes[pass_id].is_callback_scope = false;

		self.list.end_render_pass();
		debug!(pass = %debug_name, "end render pass");
		Ok(())
	}

	fn record_blit(&mut self, component: usize, name: Name) -> Result<()> {
		let comp_name = self.components[component].name;
		let (format, width, height, usage) = {
			let node = self.components[component].images.get(&name).expect("blit source image node must exist");
			(node.format, node.width, node.height, node.usage)
		};
		let debug_name = self.components[component].images[&name].debug_name.clone();
		let src_image =
			self.subsystem.get_or_create_image(self.device, comp_name, name, format, width, height, usage, &debug_name)?;
		let src_old_layout = self.subsystem.last_layout(comp_name, name);

		self.list.pipeline_barrier(
			Some(ImageBarrier {
				image: src_image,
				old_layout: src_old_layout,
				new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
				src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
				dst_stage: vk::PipelineStageFlags2::TRANSFER,
				src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
				dst_access: vk::AccessFlags2::TRANSFER_READ,
			}),
			None,
		);
		self.subsystem.set_last_layout(comp_name, name, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);

		self.list.pipeline_barrier(
			Some(ImageBarrier {
				image: self.swapchain_image,
				old_layout: vk::ImageLayout::UNDEFINED,
				new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
				src_stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
				dst_stage: vk::PipelineStageFlags2::TRANSFER,
				src_access: vk::AccessFlags2::empty(),
				dst_access: vk::AccessFlags2::TRANSFER_WRITE,
			}),
			None,
		);

		self.list.blit_image(
			src_image,
			vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
			self.swapchain_image,
			vk::ImageLayout::TRANSFER_DST_OPTIMAL,
			BlitRegion { src_width: width, src_height: height, dst_width: self.swapchain_width, dst_height: self.swapchain_height },
		);

		self.list.pipeline_barrier(
			Some(ImageBarrier {
				image: self.swapchain_image,
				old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
				new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
				src_stage: vk::PipelineStageFlags2::TRANSFER,
				dst_stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
				src_access: vk::AccessFlags2::TRANSFER_WRITE,
				dst_access: vk::AccessFlags2::empty(),
			}),
			None,
		);

		Ok(())
	}

	/// Tear the graph down (§6 "destroy"): run the destroy-callback stack
	/// LIFO, then drop every pass/component — which happens for free once
	/// `self` goes out of scope, since Rust frees owned data on `Drop`
	/// rather than through an explicit free pass.
	pub fn destroy(mut self) {
		self.subsystem.run_destroy_callbacks();
	}
}
