//! The Physical Resource Cache (§4.3) and the process-wide global state
//! (§3 "Global state", Design Notes "Global state: Storage and
//! release/destroy stacks").
//!
//! `GraphSubsystem` is the "single graph subsystem context owned by the
//! host" the Design Notes call for: it is created once, lives for the
//! process, and is passed by `&mut` into [`crate::create_graph`] every
//! frame.

use ash::vk;
use tracing::trace;

use crate::{
	device::{Device, ImageDesc},
	name::{FxHashMap, Name},
	Result,
};

/// A single cached physical device image and the bookkeeping needed to
/// decide whether it must be invalidated.
pub struct PhysicalImage {
	pub handle: Option<vk::Image>,
	pub last_layout: vk::ImageLayout,
	pub usage: vk::ImageUsageFlags,
	pub format: vk::Format,
	pub width: u32,
	pub height: u32,
	hash: Name,
}

impl PhysicalImage {
	fn new(width: u32, height: u32) -> Self {
		Self {
			handle: None,
			last_layout: vk::ImageLayout::UNDEFINED,
			usage: vk::ImageUsageFlags::empty(),
			format: vk::Format::UNDEFINED,
			width,
			height,
			hash: Name(0),
		}
	}
}

/// `(usage, format, name)` folded into one invalidation key (§4.3 step 4).
fn image_hash(usage: vk::ImageUsageFlags, format: vk::Format, name: Name) -> Name {
	name.combine(usage.as_raw() as u32).combine(format.as_raw() as u32)
}

/// The process-wide state shared across every graph instance: the Storage
/// table plus the two deferred-callback stacks.
pub struct GraphSubsystem {
	storage: FxHashMap<Name, FxHashMap<Name, PhysicalImage>>,
	release_callbacks: Vec<Box<dyn FnOnce(&dyn Device)>>,
	destroy_callbacks: Vec<Box<dyn FnOnce()>>,
}

impl Default for GraphSubsystem {
	fn default() -> Self { Self::new() }
}

impl GraphSubsystem {
	pub fn new() -> Self {
		Self {
			storage: FxHashMap::default(),
			release_callbacks: Vec::new(),
			destroy_callbacks: Vec::new(),
		}
	}

	/// Stack a callback to be run, LIFO, during [`GraphSubsystem::release`].
	pub fn add_release_callback(&mut self, f: impl FnOnce(&dyn Device) + 'static) {
		self.release_callbacks.push(Box::new(f));
	}

	/// Stack a callback to be run, LIFO, during the next graph's
	/// `destroy`.
	pub fn add_destroy_callback(&mut self, f: impl FnOnce() + 'static) { self.destroy_callbacks.push(Box::new(f)); }

	/// Drain and run the destroy-callback stack, LIFO. Called by
	/// `RenderGraph::destroy` before the graph's own allocations are freed.
	pub(crate) fn run_destroy_callbacks(&mut self) {
		while let Some(cb) = self.destroy_callbacks.pop() {
			cb();
		}
	}

	/// Tear down every cached physical image. Waits for the device to go
	/// idle first (Design Notes: "release runs after device.wait_idle()"),
	/// then runs the release-callback stack LIFO, then destroys every
	/// remaining image handle.
	pub fn release(&mut self, device: &dyn Device) {
		device.wait_idle();
		while let Some(cb) = self.release_callbacks.pop() {
			cb(device);
		}
		for (_, images) in self.storage.drain() {
			for (_, image) in images {
				if let Some(handle) = image.handle {
					device.destroy_image(handle);
				}
			}
		}
	}

	/// Read the live handle for `(component, name)` without creating or
	/// invalidating anything. Used by [`crate::compile::PassContext::get_image`]
	/// and the sampled-image pre-barrier, which must never allocate.
	pub(crate) fn peek_handle(&self, component: Name, name: Name) -> Option<vk::Image> {
		self.storage.get(&component).and_then(|c| c.get(&name)).and_then(|i| i.handle)
	}

	pub(crate) fn last_layout(&self, component: Name, name: Name) -> vk::ImageLayout {
		self.storage
			.get(&component)
			.and_then(|c| c.get(&name))
			.map(|i| i.last_layout)
			.unwrap_or(vk::ImageLayout::UNDEFINED)
	}

	pub(crate) fn set_last_layout(&mut self, component: Name, name: Name, layout: vk::ImageLayout) {
		if let Some(image) = self.storage.get_mut(&component).and_then(|c| c.get_mut(&name)) {
			image.last_layout = layout;
		}
	}

	/// Ensure a Storage entry for `(component, name)` exists, per the
	/// builder's `add_*_image` rule: created lazily with `lastLayout =
	/// UNDEFINED` and the declared size. A no-op if the entry already
	/// exists (it is never narrowed).
	pub(crate) fn ensure_entry(&mut self, component: Name, name: Name, width: u32, height: u32) {
		self.storage
			.entry(component)
			.or_default()
			.entry(name)
			.or_insert_with(|| PhysicalImage::new(width, height));
	}

	/// `get_or_create_image` (§4.3): resolve, widen, hash, invalidate if
	/// needed, return the live handle.
	pub(crate) fn get_or_create_image(
		&mut self, device: &dyn Device, component: Name, name: Name, format: vk::Format, width: u32, height: u32,
		usage: vk::ImageUsageFlags, debug_name: &str,
	) -> Result<vk::Image> {
		let entry = self
			.storage
			.entry(component)
			.or_default()
			.entry(name)
			.or_insert_with(|| PhysicalImage::new(width, height));

		let usage = usage | entry.usage;
		let width = entry.width.max(width);
		let height = entry.height.max(height);
		let hash = image_hash(usage, format, name);

		if entry.handle.is_none() || entry.hash != hash {
			if let Some(old) = entry.handle.take() {
				trace!(name = ?name, "invalidating physical image");
				device.wait_idle();
				device.destroy_image(old);
			}
			let handle = device.create_image(ImageDesc { format, usage, width, height }, debug_name)?;
			entry.handle = Some(handle);
			entry.last_layout = vk::ImageLayout::UNDEFINED;
			entry.usage = usage;
			entry.format = format;
			entry.width = width;
			entry.height = height;
			entry.hash = hash;
		}

		Ok(entry.handle.unwrap())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::RecordingDevice;

	fn desc(fmt: vk::Format, usage: vk::ImageUsageFlags) -> (vk::Format, u32, u32, vk::ImageUsageFlags) {
		(fmt, 64, 64, usage)
	}

	#[test]
	fn created_once_across_stable_frames() {
		let mut storage = GraphSubsystem::new();
		let device = RecordingDevice::new();
		let c = Name::new("c1");
		let n = Name::new("x");
		let (fmt, w, h, usage) = desc(vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT);

		let h1 = storage.get_or_create_image(&device, c, n, fmt, w, h, usage, "x").unwrap();
		let h2 = storage.get_or_create_image(&device, c, n, fmt, w, h, usage, "x").unwrap();
		assert_eq!(h1, h2);
		assert_eq!(device.created_count(), 1);
	}

	#[test]
	fn format_change_invalidates() {
		let mut storage = GraphSubsystem::new();
		let device = RecordingDevice::new();
		let c = Name::new("c1");
		let n = Name::new("x");

		storage
			.get_or_create_image(&device, c, n, vk::Format::R8G8B8A8_UNORM, 64, 64, vk::ImageUsageFlags::COLOR_ATTACHMENT, "x")
			.unwrap();
		storage
			.get_or_create_image(&device, c, n, vk::Format::R16_SFLOAT, 64, 64, vk::ImageUsageFlags::COLOR_ATTACHMENT, "x")
			.unwrap();

		assert_eq!(device.created_count(), 2);
		assert_eq!(device.destroyed_count(), 1);
		assert_eq!(storage.last_layout(c, n), vk::ImageLayout::UNDEFINED);
	}

	#[test]
	fn widening_usage_does_not_invalidate() {
		let mut storage = GraphSubsystem::new();
		let device = RecordingDevice::new();
		let c = Name::new("c1");
		let n = Name::new("x");

		storage
			.get_or_create_image(&device, c, n, vk::Format::R8G8B8A8_UNORM, 64, 64, vk::ImageUsageFlags::COLOR_ATTACHMENT, "x")
			.unwrap();
		storage
			.get_or_create_image(&device, c, n, vk::Format::R8G8B8A8_UNORM, 64, 64, vk::ImageUsageFlags::SAMPLED, "x")
			.unwrap();

		assert_eq!(device.created_count(), 1);
		let entry_usage = storage.storage.get(&c).unwrap().get(&n).unwrap().usage;
		assert!(entry_usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
		assert!(entry_usage.contains(vk::ImageUsageFlags::SAMPLED));
	}

	#[test]
	fn release_tears_down_every_image() {
		let mut storage = GraphSubsystem::new();
		let device = RecordingDevice::new();
		let c = Name::new("c1");
		let n = Name::new("x");
		storage
			.get_or_create_image(&device, c, n, vk::Format::R8G8B8A8_UNORM, 64, 64, vk::ImageUsageFlags::COLOR_ATTACHMENT, "x")
			.unwrap();

		storage.release(&device);
		assert_eq!(device.destroyed_count(), 1);
		assert!(device.wait_idle_called());
	}

	#[test]
	fn destroy_callbacks_run_lifo() {
		use std::{cell::RefCell, rc::Rc};

		let mut storage = GraphSubsystem::new();
		let order = Rc::new(RefCell::new(Vec::new()));

		let o1 = order.clone();
		storage.add_destroy_callback(move || o1.borrow_mut().push(1));
		let o2 = order.clone();
		storage.add_destroy_callback(move || o2.borrow_mut().push(2));

		storage.run_destroy_callbacks();
		assert_eq!(*order.borrow(), vec![2, 1]);
	}
}
