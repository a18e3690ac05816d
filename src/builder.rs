//! The Graph Builder (§4.2): the immediate-mode API a renderer front-end
//! drives once per frame to describe components, image nodes, graphics
//! passes and inter-component connections.

use ash::vk;
use tracing::warn;

use crate::{
	compile::PassContext,
	device::{CommandList, Device},
	error::Error,
	name::{FxHashMap, Name},
	storage::GraphSubsystem,
	sync::{is_hazard, Usage},
	Result,
};

/// Hint describing how an image is expected to be sampled. Purely
/// descriptive at this layer; the concrete `Device` backend decides how to
/// turn it into a real sampler object.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct SamplerHint {
	pub filter: vk::Filter,
	pub address_mode: vk::SamplerAddressMode,
}

/// One of the four image node kinds (§3 "Image node").
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ImageKind {
	/// Physical resource, visible only inside the declaring component.
	Private,
	/// Physical resource, may be referenced by another component.
	Output,
	/// Reference only; resolves to the OUTPUT/IO of another component.
	Input,
	/// Physical resource and may be referenced by another component.
	Io,
}

/// A declared image node. `usage` accumulates every native usage flag
/// required of the image across every pass that declares it, and is
/// widened further by `connect_image`/`connect_swapchain_image`.
pub(crate) struct ImageNode {
	pub kind: ImageKind,
	pub debug_name: String,
	pub format: vk::Format,
	pub width: u32,
	pub height: u32,
	pub sampler: Option<SamplerHint>,
	pub usage: vk::ImageUsageFlags,
}

/// A non-owning link from an INPUT/IO image node to the physical node it
/// ultimately resolves to, established by `connect_image`.
#[derive(Copy, Clone)]
pub(crate) struct ImageRef {
	pub src_component: usize,
	pub src_name: Name,
}

#[derive(Clone)]
pub(crate) struct ColorAttachmentDecl {
	pub name: Name,
	pub load_op: vk::AttachmentLoadOp,
	pub clear: Option<crate::device::ClearColor>,
}

#[derive(Clone)]
pub(crate) struct DepthStencilAttachmentDecl {
	pub name: Name,
	pub load_op: vk::AttachmentLoadOp,
	pub clear: Option<vk::ClearDepthStencilValue>,
}

type PassCallback<'g> = Box<dyn FnOnce(&PassContext<'_>, &mut dyn CommandList) + 'g>;

/// A declared graphics pass (§3 "Graphics pass").
pub(crate) struct PassNode<'g> {
	pub name: Name,
	pub debug_name: String,
	pub component: usize,
	pub width: u32,
	pub height: u32,
	pub color_attachments: Vec<ColorAttachmentDecl>,
	pub depth_stencil: Option<DepthStencilAttachmentDecl>,
	pub sampled_images: Vec<Name>,
	pub image_usages: FxHashMap<Name, Usage>,
	pub access_mask: vk::AccessFlags2,
	pub stage_mask: vk::PipelineStageFlags2,
	/// Outgoing dependency edges: passes that must run before this one.
	pub edges: Vec<usize>,
	pub callback: Option<PassCallback<'g>>,
	pub is_callback_scope: bool,
}

impl<'g> PassNode<'g> {
	fn new(name: Name, debug_name: &str, component: usize, width: u32, height: u32, callback: PassCallback<'g>) -> Self {
		Self {
			name,
			debug_name: debug_name.to_string(),
			component,
			width,
			height,
			color_attachments: Vec::new(),
			depth_stencil: None,
			sampled_images: Vec::new(),
			image_usages: FxHashMap::default(),
			access_mask: vk::AccessFlags2::empty(),
			stage_mask: vk::PipelineStageFlags2::empty(),
			edges: Vec::new(),
			callback: Some(callback),
			is_callback_scope: false,
		}
	}
}

pub(crate) struct ComponentData {
	pub name: Name,
	pub debug_name: String,
	pub images: FxHashMap<Name, ImageNode>,
	pub image_refs: FxHashMap<Name, ImageRef>,
	pub pass_index: FxHashMap<Name, usize>,
	pub pass_order: Vec<usize>,
}

impl ComponentData {
	fn new(name: Name, debug_name: &str) -> Self {
		Self {
			name,
			debug_name: debug_name.to_string(),
			images: FxHashMap::default(),
			image_refs: FxHashMap::default(),
			pass_index: FxHashMap::default(),
			pass_order: Vec::new(),
		}
	}

	fn declared(&self, name: Name) -> bool { self.images.contains_key(&name) || self.image_refs.contains_key(&name) }
}

/// Follow a node's reference chain until a physical node is reached (§3
/// "Image reference", P2). The builder API never creates a cycle, but a
/// misbehaving caller connecting a component to itself in a loop would spin
/// forever without the step guard.
pub(crate) fn dereference(components: &[ComponentData], mut comp: usize, mut name: Name) -> (usize, Name) {
	let max_steps = components.iter().map(|c| c.images.len()).sum::<usize>().max(1);
	for _ in 0..max_steps {
		match components[comp].image_refs.get(&name) {
			Some(r) => {
				comp = r.src_component;
				name = r.src_name;
			},
			None => return (comp, name),
		}
	}
	panic!("image reference cycle detected");
}

/// A frame's render graph: built once, submitted once, then destroyed.
/// Outlives neither the `GraphSubsystem`, `Device` nor `CommandList` it
/// borrows — all three live at least as long as `'g`.
pub struct RenderGraph<'g> {
	pub(crate) subsystem: &'g mut GraphSubsystem,
	pub(crate) device: &'g dyn Device,
	pub(crate) list: &'g mut dyn CommandList,
	pub(crate) swapchain_image: vk::Image,
	pub(crate) swapchain_width: u32,
	pub(crate) swapchain_height: u32,
	pub(crate) image_acquired: vk::Semaphore,
	pub(crate) present_ready: vk::Semaphore,
	pub(crate) frame_complete: vk::Fence,
	pub(crate) components: Vec<ComponentData>,
	component_index: FxHashMap<Name, usize>,
	pub(crate) passes: Vec<PassNode<'g>>,
	pub(crate) blit: Option<(usize, Name)>,
}

/// Build a new frame's graph (§4.2 `create_graph`). Fails with
/// `InvalidDevice` if `device` reports itself unusable.
#[allow(clippy::too_many_arguments)]
pub fn create_graph<'g>(
	subsystem: &'g mut GraphSubsystem, device: &'g dyn Device, list: &'g mut dyn CommandList, swapchain_image: vk::Image,
	swapchain_width: u32, swapchain_height: u32, image_acquired: vk::Semaphore, present_ready: vk::Semaphore,
	frame_complete: vk::Fence,
) -> Result<RenderGraph<'g>> {
	if !device.is_valid() {
		return Err(Error::InvalidDevice("device reported itself unusable".into()));
	}
	Ok(RenderGraph {
		subsystem,
		device,
		list,
		swapchain_image,
		swapchain_width,
		swapchain_height,
		image_acquired,
		present_ready,
		frame_complete,
		components: Vec::new(),
		component_index: FxHashMap::default(),
		passes: Vec::new(),
		blit: None,
	})
}

impl<'g> RenderGraph<'g> {
	/// `graph.add_component(name)` (§4.2). Fails with `DuplicateName` if
	/// already declared in this built graph.
	pub fn add_component(&mut self, name: &str) -> Result<Component<'_, 'g>> {
		let n = Name::new(name);
		if self.component_index.contains_key(&n) {
			warn!(component = name, "duplicate component name");
			return Err(Error::DuplicateName(name.to_string()));
		}
		let idx = self.components.len();
		self.components.push(ComponentData::new(n, name));
		self.component_index.insert(n, idx);
		Ok(Component { graph: self, idx })
	}

	/// `graph.connect_image(srcComponent, srcOutputName, dstComponent,
	/// dstInputName)` (§4.2).
	pub fn connect_image(&mut self, src_component: &str, src_name: &str, dst_component: &str, dst_name: &str) -> Result<()> {
		let sc = Name::new(src_component);
		let sn = Name::new(src_name);
		let dc = Name::new(dst_component);
		let dn = Name::new(dst_name);

		let src_idx = *self
			.component_index
			.get(&sc)
			.ok_or_else(|| Error::UnknownName(src_component.to_string()))?;
		let dst_idx = *self
			.component_index
			.get(&dc)
			.ok_or_else(|| Error::UnknownName(dst_component.to_string()))?;

		if !self.components[src_idx].declared(sn) {
			return Err(Error::UnknownName(src_name.to_string()));
		}
		if !self.components[dst_idx].declared(dn) {
			return Err(Error::UnknownName(dst_name.to_string()));
		}

		// Cartesian product of passes that actually declared usage of the
		// connected image on each side. A pass with no usage of the image
		// has no usage to be hazardous, so it is excluded (§4.2 "for each
		// pair (srcPass, dstPass) where a hazard between their usages exists").
		let mut dst_usage_union = vk::ImageUsageFlags::empty();
		for &src_pass in &self.components[src_idx].pass_order {
			let Some(&src_usage) = self.passes[src_pass].image_usages.get(&sn) else { continue };
			for &dst_pass in &self.components[dst_idx].pass_order {
				let Some(&dst_usage) = self.passes[dst_pass].image_usages.get(&dn) else { continue };
				if is_hazard(src_usage, dst_usage) {
					self.passes[src_pass].edges.push(dst_pass);
				}
			}
		}
		for &dst_pass in &self.components[dst_idx].pass_order {
			if let Some(&dst_usage) = self.passes[dst_pass].image_usages.get(&dn) {
				dst_usage_union |= dst_usage.native_image_usage();
			}
		}

		let (phys_comp, phys_name) = dereference(&self.components, src_idx, sn);
		let (format, sampler, width, height) = {
			let node = self.components[phys_comp]
				.images
				.get_mut(&phys_name)
				.expect("dereference always resolves to a declared image node");
			node.usage |= dst_usage_union;
			(node.format, node.sampler, node.width, node.height)
		};

		if let Some(dst_node) = self.components[dst_idx].images.get_mut(&dn) {
			dst_node.format = format;
			dst_node.sampler = sampler;
			dst_node.width = width;
			dst_node.height = height;
		}

		self.components[dst_idx].image_refs.insert(dn, ImageRef { src_component: phys_comp, src_name: phys_name });
		Ok(())
	}

	/// `graph.connect_swapchain_image(srcComponent, srcOutputName)` (§4.2).
	/// At most one call per frame is meaningful; a second call simply
	/// overwrites the blit source, matching the builder's "last write wins"
	/// treatment of every other declared field.
	pub fn connect_swapchain_image(&mut self, src_component: &str, src_name: &str) -> Result<()> {
		let sc = Name::new(src_component);
		let sn = Name::new(src_name);
		let src_idx = *self
			.component_index
			.get(&sc)
			.ok_or_else(|| Error::UnknownName(src_component.to_string()))?;
		if !self.components[src_idx].declared(sn) {
			return Err(Error::UnknownName(src_name.to_string()));
		}

		let (phys_comp, phys_name) = dereference(&self.components, src_idx, sn);
		if let Some(node) = self.components[phys_comp].images.get_mut(&phys_name) {
			node.usage |= vk::ImageUsageFlags::TRANSFER_SRC;
		}
		self.blit = Some((phys_comp, phys_name));
		Ok(())
	}
}

/// A handle to a component mid-build, borrowed from its owning graph.
pub struct Component<'a, 'g> {
	graph: &'a mut RenderGraph<'g>,
	idx: usize,
}

impl<'a, 'g> Component<'a, 'g> {
	fn add_image(
		&mut self, kind: ImageKind, name: &str, format: vk::Format, width: u32, height: u32, sampler: Option<SamplerHint>,
	) -> Result<Name> {
		let n = Name::new(name);
		let comp_name = self.graph.components[self.idx].name;
		let comp = &mut self.graph.components[self.idx];
		if comp.declared(n) {
			warn!(component = %comp.debug_name, image = name, "duplicate image name");
			return Err(Error::DuplicateName(name.to_string()));
		}
		comp.images.insert(n, ImageNode {
			kind,
			debug_name: name.to_string(),
			format,
			width,
			height,
			sampler,
			usage: vk::ImageUsageFlags::empty(),
		});
		// Non-input kinds get a Storage entry created lazily on first
		// declaration; INPUT is reference-only and never owns one.
		if !matches!(kind, ImageKind::Input) {
			self.graph.subsystem.ensure_entry(comp_name, n, width, height);
		}
		Ok(n)
	}

	pub fn add_private_image(
		&mut self, name: &str, format: vk::Format, width: u32, height: u32, sampler: Option<SamplerHint>,
	) -> Result<Name> {
		self.add_image(ImageKind::Private, name, format, width, height, sampler)
	}

	pub fn add_output_image(
		&mut self, name: &str, format: vk::Format, width: u32, height: u32, sampler: Option<SamplerHint>,
	) -> Result<Name> {
		self.add_image(ImageKind::Output, name, format, width, height, sampler)
	}

	pub fn add_input_image(&mut self, name: &str, format: vk::Format, width: u32, height: u32) -> Result<Name> {
		self.add_image(ImageKind::Input, name, format, width, height, None)
	}

	pub fn add_io_image(&mut self, name: &str, format: vk::Format, width: u32, height: u32) -> Result<Name> {
		self.add_image(ImageKind::Io, name, format, width, height, None)
	}

	/// `component.add_graphics_pass(name, width, height, callback)` (§4.2).
	pub fn add_graphics_pass(
		&mut self, name: &str, width: u32, height: u32, callback: impl FnOnce(&PassContext<'_>, &mut dyn CommandList) + 'g,
	) -> Result<Pass<'_, 'g>> {
		let n = Name::new(name);
		if self.graph.components[self.idx].pass_index.contains_key(&n) {
			warn!(pass = name, "duplicate pass name");
			return Err(Error::DuplicateName(name.to_string()));
		}
		let pass_id = self.graph.passes.len();
		self.graph.passes.push(PassNode::new(n, name, self.idx, width, height, Box::new(callback)));
		let comp = &mut self.graph.components[self.idx];
		comp.pass_index.insert(n, pass_id);
		comp.pass_order.push(pass_id);
		Ok(Pass { graph: &mut *self.graph, component_idx: self.idx, pass_id })
	}
}

/// A handle to a graphics pass mid-build, borrowed from its owning graph.
pub struct Pass<'a, 'g> {
	graph: &'a mut RenderGraph<'g>,
	component_idx: usize,
	pass_id: usize,
}

impl<'a, 'g> Pass<'a, 'g> {
	fn check_clear(load_op: vk::AttachmentLoadOp, has_clear: bool, what: &str) -> Result<()> {
		if load_op == vk::AttachmentLoadOp::CLEAR && !has_clear {
			return Err(Error::ClearValueMismatch(format!("{what}: load-op CLEAR requires a clear value")));
		}
		if load_op != vk::AttachmentLoadOp::CLEAR && has_clear {
			return Err(Error::ClearValueMismatch(format!("{what}: non-CLEAR load-op must not carry a clear value")));
		}
		Ok(())
	}

	/// Hazard-edge construction shared by every `use_*` call: for every
	/// earlier pass in the same component that also uses `name`, add an
	/// edge if a hazard exists between that usage and `usage`.
	fn add_intra_component_edges(&mut self, name: Name, usage: Usage) {
		let comp = &self.graph.components[self.component_idx];
		let earlier: Vec<usize> = comp.pass_order.iter().copied().take_while(|&p| p != self.pass_id).collect();
		for prev_id in earlier {
			if let Some(&prev_usage) = self.graph.passes[prev_id].image_usages.get(&name) {
				if is_hazard(prev_usage, usage) {
					self.graph.passes[prev_id].edges.push(self.pass_id);
				}
			}
		}
	}

	/// `pass.use_color_attachment(name, loadOp, clearValue?)` (§4.2).
	pub fn use_color_attachment(
		&mut self, name: &str, load_op: vk::AttachmentLoadOp, clear: Option<crate::device::ClearColor>,
	) -> Result<()> {
		let n = Name::new(name);
		Self::check_clear(load_op, clear.is_some(), "color attachment")?;

		let comp = &self.graph.components[self.component_idx];
		if !comp.declared(n) {
			return Err(Error::UnknownName(name.to_string()));
		}
		if self.graph.passes[self.pass_id].image_usages.contains_key(&n) {
			return Err(Error::DoubleUse(format!("{name}: already used by this pass")));
		}

		let pass = &mut self.graph.passes[self.pass_id];
		pass.image_usages.insert(n, Usage::ColorAttachment);
		pass.color_attachments.push(ColorAttachmentDecl { name: n, load_op, clear });
		pass.access_mask |= Usage::ColorAttachment.access_mask();
		pass.stage_mask |= Usage::ColorAttachment.stage_mask();

		if let Some(node) = self.graph.components[self.component_idx].images.get_mut(&n) {
			node.usage |= Usage::ColorAttachment.native_image_usage();
		}

		self.add_intra_component_edges(n, Usage::ColorAttachment);
		Ok(())
	}

	/// `pass.use_depth_stencil_attachment(name, loadOp, clearValue?)`
	/// (§4.2). Stencil load/store are hard-coded to `DONT_CARE`, preserved
	/// from the source this crate is grounded on (see Design Notes).
	pub fn use_depth_stencil_attachment(
		&mut self, name: &str, load_op: vk::AttachmentLoadOp, clear: Option<vk::ClearDepthStencilValue>,
	) -> Result<()> {
		let n = Name::new(name);
		Self::check_clear(load_op, clear.is_some(), "depth-stencil attachment")?;

		let comp = &self.graph.components[self.component_idx];
		if !comp.declared(n) {
			return Err(Error::UnknownName(name.to_string()));
		}
		let pass = &self.graph.passes[self.pass_id];
		if pass.depth_stencil.is_some() {
			return Err(Error::DoubleUse("already using a depth-stencil attachment".to_string()));
		}
		if pass.image_usages.contains_key(&n) {
			return Err(Error::DoubleUse(format!("{name}: already used by this pass")));
		}

		let pass = &mut self.graph.passes[self.pass_id];
		pass.image_usages.insert(n, Usage::DepthStencilAttachment);
		pass.depth_stencil = Some(DepthStencilAttachmentDecl { name: n, load_op, clear });
		pass.access_mask |= Usage::DepthStencilAttachment.access_mask();
		pass.stage_mask |= Usage::DepthStencilAttachment.stage_mask();

		if let Some(node) = self.graph.components[self.component_idx].images.get_mut(&n) {
			node.usage |= Usage::DepthStencilAttachment.native_image_usage();
		}

		// The source this crate is grounded on omits this loop for
		// depth-stencil; the Design Notes direct treating depth-stencil
		// hazards symmetrically to color, so it is added here.
		self.add_intra_component_edges(n, Usage::DepthStencilAttachment);
		Ok(())
	}

	/// `pass.use_image_sampled(name)` (§4.2).
	pub fn use_image_sampled(&mut self, name: &str) -> Result<()> {
		let n = Name::new(name);
		let comp = &self.graph.components[self.component_idx];
		if !comp.declared(n) {
			return Err(Error::UnknownName(name.to_string()));
		}
		if self.graph.passes[self.pass_id].image_usages.contains_key(&n) {
			return Err(Error::DoubleUse(format!("{name}: already used by this pass")));
		}

		let pass = &mut self.graph.passes[self.pass_id];
		pass.image_usages.insert(n, Usage::Sampled);
		pass.sampled_images.push(n);

		if let Some(node) = self.graph.components[self.component_idx].images.get_mut(&n) {
			node.usage |= Usage::Sampled.native_image_usage();
		}

		self.add_intra_component_edges(n, Usage::Sampled);
		Ok(())
	}
}
