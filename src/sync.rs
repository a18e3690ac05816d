//! The hazard predicate table (§4.2) and the pipeline-stage/access masks
//! each declared usage contributes to a pass.

use ash::vk;

/// How a single pass uses a single image. Mirrors `RGraphImageUsage` in the
/// source this crate is grounded on, widened with `Sampled`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Usage {
	ColorAttachment,
	DepthStencilAttachment,
	Sampled,
}

impl Usage {
	/// The native `VkImageUsageFlags` bit this usage requires on the
	/// physical image.
	pub fn native_image_usage(self) -> vk::ImageUsageFlags {
		match self {
			Usage::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
			Usage::DepthStencilAttachment => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
			Usage::Sampled => vk::ImageUsageFlags::SAMPLED,
		}
	}

	/// The access mask this usage contributes to a pass's accumulated
	/// `accessFlags`.
	pub fn access_mask(self) -> vk::AccessFlags2 {
		match self {
			Usage::ColorAttachment => vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
			Usage::DepthStencilAttachment => vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
			Usage::Sampled => vk::AccessFlags2::SHADER_READ,
		}
	}

	/// The pipeline stage mask this usage contributes to a pass's
	/// accumulated `stageFlags`.
	pub fn stage_mask(self) -> vk::PipelineStageFlags2 {
		match self {
			Usage::ColorAttachment => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
			Usage::DepthStencilAttachment => {
				vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
			},
			Usage::Sampled => vk::PipelineStageFlags2::FRAGMENT_SHADER,
		}
	}
}

/// Hazard predicate between a producing usage and a consuming usage on the
/// same resolved physical image (§4.2's table). Depth-stencil is treated
/// symmetrically to color, per the Design Notes' resolution of that open
/// question.
pub fn is_hazard(producer: Usage, consumer: Usage) -> bool {
	use Usage::*;
	match (producer, consumer) {
		(ColorAttachment, Sampled) => true,             // RAW
		(Sampled, ColorAttachment) => true,              // WAR
		(ColorAttachment, ColorAttachment) => true,      // WAW
		(DepthStencilAttachment, Sampled) => true,       // RAW
		(Sampled, DepthStencilAttachment) => true,       // WAR
		(DepthStencilAttachment, DepthStencilAttachment) => true, // WAW
		(ColorAttachment, DepthStencilAttachment) | (DepthStencilAttachment, ColorAttachment) => true,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn color_to_sampled_is_raw_hazard() {
		assert!(is_hazard(Usage::ColorAttachment, Usage::Sampled));
	}

	#[test]
	fn sampled_to_color_is_war_hazard() {
		assert!(is_hazard(Usage::Sampled, Usage::ColorAttachment));
	}

	#[test]
	fn two_samples_are_not_hazardous() {
		assert!(!is_hazard(Usage::Sampled, Usage::Sampled));
	}

	#[test]
	fn depth_stencil_mirrors_color() {
		assert!(is_hazard(Usage::DepthStencilAttachment, Usage::Sampled));
		assert!(is_hazard(Usage::Sampled, Usage::DepthStencilAttachment));
		assert!(is_hazard(Usage::DepthStencilAttachment, Usage::DepthStencilAttachment));
	}
}
